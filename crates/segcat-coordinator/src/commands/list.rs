use anyhow::{anyhow, Result};
use segcat_core::{Inventory, CREATED_PROPERTY};
use segcat_service::{PollOutcome, SegmentManager};
use serde_json::{json, Value};

pub async fn run(manager: &SegmentManager) -> Result<()> {
    match manager.poll().await {
        PollOutcome::Failed => return Err(anyhow!("failed to read the segment table")),
        PollOutcome::Empty | PollOutcome::Published { .. } => {}
    }

    let listing = render(&manager.snapshot());
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

/// JSON view of an inventory: one object per datasource, ordered by name.
pub fn render(inventory: &Inventory) -> Value {
    let data_sources: Vec<Value> = inventory
        .data_sources()
        .iter()
        .map(|data_source| {
            json!({
                "name": data_source.name(),
                "created": data_source.properties().get(CREATED_PROPERTY),
                "segments": data_source
                    .segments()
                    .iter()
                    .map(|segment| json!({
                        "id": segment.id(),
                        "interval": segment.interval().to_string(),
                        "version": segment.version(),
                        "size": segment.size(),
                        "dimensions": segment.dimensions(),
                        "metrics": segment.metrics(),
                        "loadSpec": segment.load_spec(),
                    }))
                    .collect::<Vec<_>>(),
                "sizeBytes": data_source.size_bytes(),
            })
        })
        .collect();
    Value::Array(data_sources)
}
