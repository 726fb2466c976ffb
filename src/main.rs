use dolt_vc::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Info by default, sqlx quieter; RUST_LOG overrides both
    use env_logger::{Builder, Env};
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_env(Env::default())
        .init();

    let config = AppConfig::load()?;
    log::info!(
        "configuration loaded: server={}:{} primary branch={}",
        config.server.host,
        config.server.port,
        config.version_control.default_branch
    );

    dolt_vc::run_server(config).await
}
