//! tagsync monitor binary.
//!
//! Usage: `tagsync-monitor [settings.toml]`

use std::path::PathBuf;

use anyhow::Context;
use tagsync_client::{ClientSettings, init_metrics, init_tracing, run_session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings =
        ClientSettings::load(path.as_deref()).context("could not load monitor settings")?;

    init_tracing(&settings.log_filter);
    let metrics = init_metrics()?;

    tracing::info!("Starting tagsync monitor v{}", tagsync_client::version());
    tracing::info!(
        tags = settings.session.tag_count,
        pattern = %settings.session.pattern,
        workers = settings.cache.subscription_workers(),
        "Session settings loaded"
    );

    let report = run_session(&settings.session, settings.cache_config()).await?;
    tracing::info!(?report, "Session report");

    tracing::info!("Metrics snapshot:\n{}", metrics.render());
    Ok(())
}
