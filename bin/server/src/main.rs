use keyhost_integration::Integration;
use keyhost_jira::JiraClient;
use keyhost_server::{SingleAppServer, config::ServerConfig, shutdown_signal};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!(
        service = %config.service_name,
        store = config.credential_store.kind(),
        "Loaded configuration"
    );

    // The credential is not read here; the first operation that needs it
    // resolves it.
    let store = config
        .credential_store
        .build()
        .expect("failed to build credential store");
    let integration = Integration::new(config.service_name, store);

    let client = JiraClient::new(&config.jira.base_url, config.jira.timeout())
        .expect("failed to build Jira client");
    let application =
        keyhost_jira::application(integration, client).expect("failed to build application");

    let server = Arc::new(SingleAppServer::new(config.bind_address));
    server
        .register_application(application)
        .expect("failed to register application");

    server.run(shutdown_signal()).await.expect("server error");
}
