use tracing_subscriber::{filter::Directive, EnvFilter};

pub fn init_tracing() {
    let default_directive: Directive = "portal_ingestion=info"
        .parse()
        .unwrap_or_else(|_| tracing::Level::INFO.into());
    let filter = EnvFilter::from_default_env()
        .add_directive(default_directive)
        .add_directive("usage_client=info".parse().unwrap_or_else(|_| tracing::Level::INFO.into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
