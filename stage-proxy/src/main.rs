use clap::Parser;
use stage_proxy::config::Config;
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Buffering proxy in front of a remote artifact-staging service")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    config.validate()?;

    stage_proxy::run(config).await?;
    Ok(())
}
