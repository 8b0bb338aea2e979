use anyhow::{Context, Result};
use segcat_service::SegmentManager;

pub async fn enable_data_source(manager: &SegmentManager, name: &str) -> Result<()> {
    manager
        .enable_data_source(name)
        .await
        .with_context(|| format!("failed to enable datasource {name}"))?;
    println!("enabled datasource {name}; visible after the next poll");
    Ok(())
}

pub async fn enable_segment(manager: &SegmentManager, segment_id: &str) -> Result<()> {
    manager
        .enable_segment(segment_id)
        .await
        .with_context(|| format!("failed to enable segment {segment_id}"))?;
    println!("enabled segment {segment_id}");
    Ok(())
}

/// Removal is checked against the published inventory, so it is loaded first.
pub async fn remove_data_source(manager: &SegmentManager, name: &str) -> Result<()> {
    manager.poll().await;
    manager
        .remove_data_source(name)
        .await
        .with_context(|| format!("failed to remove datasource {name}"))?;
    println!("removed datasource {name}");
    Ok(())
}

pub async fn remove_segment(
    manager: &SegmentManager,
    data_source: &str,
    segment_id: &str,
) -> Result<()> {
    manager.poll().await;
    manager
        .remove_segment(data_source, segment_id)
        .await
        .with_context(|| format!("failed to remove segment {segment_id} of {data_source}"))?;
    println!("removed segment {segment_id}");
    Ok(())
}
