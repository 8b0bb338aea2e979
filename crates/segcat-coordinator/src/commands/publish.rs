use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use segcat_core::DataSegment;
use segcat_metadata::SqliteSegmentRepository;

/// Inserts every segment payload found under `paths` into the segment table.
///
/// Each path is either a JSON file holding one segment or a directory whose `*.json`
/// files are read in name order. Returns the number of rows inserted.
pub async fn publish_segments(
    repository: &SqliteSegmentRepository,
    table: &str,
    paths: &[PathBuf],
    used: bool,
) -> Result<usize> {
    let mut files = Vec::new();
    for path in paths {
        files.extend(collect_payload_files(path)?);
    }
    if files.is_empty() {
        return Err(anyhow!("no segment payloads found"));
    }

    let mut published = 0_usize;
    for file in files {
        let segment = read_segment(&file)?;
        repository
            .insert_segment(table, &segment, used)
            .await
            .map_err(|err| anyhow!("failed to publish {}: {}", segment.id(), err))?;
        tracing::info!(segment_id = %segment.id(), used, "Published segment");
        published += 1;
    }

    Ok(published)
}

fn collect_payload_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in
        fs::read_dir(path).with_context(|| format!("failed to read {}", path.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_segment(path: &Path) -> Result<DataSegment> {
    let payload =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    DataSegment::from_payload(&payload)
        .with_context(|| format!("invalid segment payload in {}", path.display()))
}
