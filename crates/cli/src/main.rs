use anyhow::Context;
use tokio::io::BufReader;

use warehouse_cli::{Warehouse, run};
use warehouse_infra::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warehouse_observability::init();

    let config = RuntimeConfig::from_env().context("invalid runtime configuration")?;
    tracing::info!(snapshot_every = config.snapshot_every, "starting warehouse runtime");

    let warehouse = Warehouse::start(config)?;
    run(&warehouse, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    warehouse.shutdown();
    Ok(())
}
