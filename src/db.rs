use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// PostgreSQL-backed implementation of every repository trait.
///
/// The trait impls live next to the traits (`auth::repo`, `patients::repo`,
/// `plans::repo`); multi-row writes each run inside one transaction.
#[derive(Clone)]
pub struct PgStore {
    pub db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }
}
