mod app;
mod auth;
mod config;
mod db;
mod error;
mod extract;
#[cfg(test)]
mod memory;
mod patients;
mod plans;
mod policy;
mod response;
mod state;
mod storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "nutriplan=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (app_state, store) = state::AppState::init().await?;
    store.migrate().await?;

    error::expose_internal_errors(!app_state.config.production);
    tokio::fs::create_dir_all(&app_state.config.uploads_dir).await?;
    tracing::info!(
        production = app_state.config.production,
        uploads_dir = %app_state.config.uploads_dir,
        "starting nutriplan"
    );

    let addr = app_state.config.bind_addr()?;
    let app = app::build_app(app_state);
    app::serve(app, addr).await
}
