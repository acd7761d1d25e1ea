mod event;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::identity::{HttpVerifier, IdentityConfig, VerifyIdentity};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3001".into())
        .parse()
        .expect("invalid PORT");

    // Identity verification is optional: without it every connection
    // resolves as a guest, which is still a fully functional relay.
    let (verifier, verify_timeout) = match IdentityConfig::from_env() {
        Some(config) => {
            tracing::info!(url = %config.verify_url, "identity verification enabled");
            let timeout = config.verify_timeout;
            let verifier: Arc<dyn VerifyIdentity> = Arc::new(HttpVerifier::new(&config));
            (Some(verifier), timeout)
        }
        None => {
            tracing::warn!("IDENTITY_VERIFY_URL not set — all connections resolve as guests");
            (None, IdentityConfig::DEFAULT_TIMEOUT)
        }
    };

    let state = state::AppState::new(verifier, verify_timeout);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "boardrelay listening");
    axum::serve(listener, app).await.expect("server failed");
}
