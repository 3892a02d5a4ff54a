use axum::routing::get;
use axum::Router;
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tripserver::core::config::AppConfig;
use tripserver::core::state::AppState;
use tripserver::core::utils::{create_conn, create_s3_operator, run_migrations};
use tripserver::{catalog, crm, effects};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;

    let pool = create_conn()?;
    run_migrations(&pool).map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;
    info!("database ready");

    let drive = match &config.drive {
        Some(drive_config) => {
            let client = create_s3_operator(drive_config).await?;
            info!("object storage configured at {}", drive_config.server);
            Some(client)
        }
        None => {
            info!("object storage not configured; PDF uploads disabled");
            None
        }
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState {
        conn: pool,
        config,
        drive,
    });

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(crm::configure_crm_routes())
        .merge(catalog::configure_catalog_routes())
        .merge(effects::configure_admin_routes())
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
