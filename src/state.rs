use std::sync::Arc;

use crate::{
    auth::{
        jwt::JwtKeys,
        password::{Argon2Credentials, CredentialStore},
        repo::{TokenRepo, UserRepo},
        services::AuthService,
        tokens::TokenService,
    },
    config::AppConfig,
    db::PgStore,
    patients::{repo::PatientRepo, services::PatientsService},
    plans::{repo::PlanRepo, services::PlansService},
    storage::{DiskStorage, StorageClient},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
    pub patients: PatientsService,
    pub plans: PlansService,
}

impl AppState {
    /// Connects to Postgres and wires every service to it.
    pub async fn init() -> anyhow::Result<(Self, PgStore)> {
        let config = Arc::new(AppConfig::from_env()?);
        let store = PgStore::connect(&config.database_url).await?;
        let storage = Arc::new(DiskStorage::new(&config.uploads_dir)) as Arc<dyn StorageClient>;
        let shared = Arc::new(store.clone());
        let state = Self::from_parts(
            config,
            shared.clone(),
            shared.clone(),
            shared.clone(),
            shared,
            storage,
        );
        Ok((state, store))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserRepo>,
        tokens: Arc<dyn TokenRepo>,
        links: Arc<dyn PatientRepo>,
        plans: Arc<dyn PlanRepo>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        let credentials = Arc::new(Argon2Credentials) as Arc<dyn CredentialStore>;
        let token_service = TokenService::new(JwtKeys::from(&config.jwt), tokens);
        let auth = AuthService::new(users.clone(), token_service, credentials.clone(), storage);
        let patients = PatientsService::new(users.clone(), links.clone(), credentials);
        let plans = PlansService::new(plans, users, links);
        Self {
            config,
            auth,
            patients,
            plans,
        }
    }

    /// Fully working state over an empty in-memory store.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::memory::MemoryStore;

        let config = Arc::new(AppConfig::test());
        let store = Arc::new(MemoryStore::default());
        let storage = Arc::new(DiskStorage::new(&config.uploads_dir)) as Arc<dyn StorageClient>;
        Self::from_parts(
            config,
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            storage,
        )
    }
}
