use std::env;
use surge::config::RunConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: surge <config.json>"))?;

    let config = RunConfig::from_file(&path)?;
    let outcome = surge::run::execute(config).await?;

    println!("{}", serde_json::to_string_pretty(&outcome.summary)?);

    Ok(())
}
