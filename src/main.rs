mod config;
mod db;
mod rate_limit;
mod routes;
mod services;
mod state;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("polify=info,tower_http=info")))
        .init();

    let config = config::AppConfig::from_env().expect("invalid configuration");

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    let state = state::AppState::from_config(pool.clone(), &config);
    if state.mailer.is_none() {
        tracing::warn!("RESEND_API_KEY not set; access codes will be logged instead of emailed");
    }
    if state.calendar.is_none() {
        tracing::info!("calendar integration disabled");
    }

    // Expired sessions, access codes and invitations.
    let _sweeper = services::sweeper::spawn_sweeper(pool, state.rate_limiter.clone(), config.sweep_interval);

    let app = routes::app(state, config.cors_allow_origin.as_deref());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "polify listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
