use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use eaglehub_server::config::{generate_config_template, Config};
use eaglehub_server::loader::{EnvVarProbe, LayeredBase64};
use eaglehub_server::store::SqliteStore;
use eaglehub_server::{db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("eaglehub_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .init();
    }

    tracing::info!("EagleHub loader v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    let loader = config.loader.clone().unwrap_or_default();
    let environment = config.environment.clone().unwrap_or_default();
    if !environment.suspicious_vars.is_empty() {
        tracing::info!(
            "Environment probe watching {} variable(s)",
            environment.suspicious_vars.len()
        );
    }

    let app_state = state::AppState {
        store: Arc::new(SqliteStore::new(db)),
        probe: Arc::new(EnvVarProbe::new(environment.suspicious_vars)),
        wrapper: Arc::new(LayeredBase64::new(loader.vm_max_stack)),
        loader,
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
