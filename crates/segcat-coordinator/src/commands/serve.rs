use std::future::Future;

use anyhow::Result;
use segcat_service::SegmentManager;

/// Runs the poll loop until `shutdown` resolves, then stops the manager.
pub async fn run(manager: &SegmentManager, shutdown: impl Future<Output = ()>) -> Result<()> {
    manager.start();
    tracing::info!(
        table = %manager.config().segment_table,
        "Segment catalog coordinator running"
    );

    shutdown.await;

    manager.stop();
    tracing::info!("Shutdown complete");
    Ok(())
}
