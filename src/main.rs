use dataplane_sip_feed::{run_feed, AppConfig, DataplaneSipFeed, ObservableRepository};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "dataplane_sip_feed=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = AppConfig::from_env()?;
    let repository = ObservableRepository::connect(&config.database_url).await?;
    let feed = DataplaneSipFeed::new(config.feed, repository.clone())?;

    let report = run_feed(&feed, &repository).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
