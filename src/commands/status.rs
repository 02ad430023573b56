use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::{Manifest, RunReport};

pub fn run(args: StatusArgs) -> Result<()> {
    let family_dir = args.output_path.join(args.family.as_str());
    let manifest_path = family_dir.join("metadata.json");
    let report_path = family_dir.join("run_report.json");

    info!(output = %family_dir.display(), "status requested");

    match read_optional::<Manifest>(&manifest_path)? {
        Some(manifest) => info!(
            last_updated = %manifest.last_updated,
            family = %manifest.family,
            models = manifest.models.len(),
            locations = manifest.location_count,
            demo_mode = manifest.demo_mode,
            "loaded manifest"
        ),
        None => warn!(path = %manifest_path.display(), "manifest missing"),
    }

    match read_optional::<RunReport>(&report_path)? {
        Some(report) => {
            let counts = &report.counts;
            info!(
                run_id = %report.run_id,
                status = %report.status,
                started_at = %report.started_at,
                finished_at = %report.finished_at,
                files_discovered = counts.files_discovered,
                files_failed = counts.files_failed,
                rows_read = counts.rows.rows_read,
                rows_dropped = counts.rows.dropped(),
                predictions = counts.predictions_indexed,
                payloads = counts.payloads_written,
                "loaded run report"
            );
            for failed in &report.failed_files {
                warn!(
                    model = %failed.model,
                    path = %failed.path,
                    kind = %failed.kind,
                    reason = %failed.reason,
                    "file failed in last run"
                );
            }
            for warning in &report.warnings {
                warn!(warning = %warning, "last run warning");
            }
        }
        None => warn!(path = %report_path.display(), "run report missing"),
    }

    Ok(())
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::ForecastFamily;

    #[test]
    fn missing_documents_are_not_an_error() {
        let dir = TempDir::new().expect("temp dir");
        run(StatusArgs {
            output_path: dir.path().to_path_buf(),
            family: ForecastFamily::Rsv,
        })
        .expect("status tolerates missing documents");
    }

    #[test]
    fn manifest_is_read_back() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("metadata.json");
        fs::write(
            &path,
            r#"{"last_updated":"2024-01-06 12:00:00","family":"flusight","models":["a"],
               "locations":[],"location_count":0,"demo_mode":true}"#,
        )
        .expect("write manifest");

        let manifest: Manifest = read_optional(&path)
            .expect("manifest parses")
            .expect("manifest present");
        assert_eq!(manifest.models, vec!["a"]);
        assert!(manifest.demo_mode);
        assert!(manifest.age_groups.is_none());

        fs::write(&path, "not json").expect("overwrite manifest");
        assert!(read_optional::<Manifest>(&path).is_err());
    }
}
