use anyhow::Context;
use gridslot::orchestration::Replayer;
use gridslot::{config::Config, db::init_db, Repository};
use std::sync::Arc;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = Config::from_env().context("Configuration error")?;

    // Initialize database and dependencies
    let pool = init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));
    let replayer = Replayer::new(repo, config.clone());

    let summary = match &config.events_path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path))?;
            replayer.run(BufReader::new(file)).await?
        }
        None => replayer.run(BufReader::new(tokio::io::stdin())).await?,
    };

    tracing::info!(
        lines = summary.lines,
        ledger_rows_new = summary.ledger_rows_new,
        rejected = summary.rejected,
        total_profit = %summary.total_profit,
        "Replay complete"
    );
    Ok(())
}
