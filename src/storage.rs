//! Persistence of measurement results.
//!
//! The engine hands a [`MeasurementResult`] to a [`ResultWriter`] and does not care
//! about the format. [`JsonResultWriter`] is the writer shipped with the crate.

use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use crate::engine::MeasurementResult;
use crate::error::AppResult;

/// Persistence collaborator for finished (or partial) measurements.
#[async_trait]
pub trait ResultWriter: Send + Sync {
    /// Store `result` at `path`.
    async fn write(&self, result: &MeasurementResult, path: &Path) -> AppResult<()>;
}

/// Writes results as pretty-printed JSON, creating parent directories as needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonResultWriter;

#[async_trait]
impl ResultWriter for JsonResultWriter {
    async fn write(&self, result: &MeasurementResult, path: &Path) -> AppResult<()> {
        let json = serde_json::to_vec_pretty(result)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), plan = %result.plan.name, "measurement saved");
        Ok(())
    }
}

/// Read back a result written by [`JsonResultWriter`].
pub async fn load_result(path: &Path) -> AppResult<MeasurementResult> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
