use anyhow::{Error, Result, anyhow};
use notify_service::{app::App, config::Config, utils::init_tracing};

#[tokio::main]
async fn main() -> Result<(), Error> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let config = Config::load()?;
    init_tracing(&config.log_format);

    App::new(config).run().await
}
