use mock_server::AppState;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "5984".to_string());
    let addr = format!("127.0.0.1:{port}");

    let mut state = AppState::new();
    if let (Ok(key), Ok(secret)) = (std::env::var("API_KEY"), std::env::var("API_KEY_PASSWORD")) {
        state = state.with_credentials(&key, &secret);
        info!("basic auth required for key {key}");
    }
    // Comma-separated databases to create at startup.
    if let Ok(names) = std::env::var("MOCK_DATABASES") {
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if state.create_database(name).await.is_ok() {
                info!("created database {name}");
            }
        }
    }

    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    mock_server::serve(listener, state).await
}
