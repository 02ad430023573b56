use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::cli::TruthArgs;
use crate::commands::Session;
use crate::commands::process::{EmissionTarget, assign_payload_paths};
use crate::config::{HubConfig, HubPaths};
use crate::model::TruthPayload;
use crate::util::{ensure_directory, write_json_compact};

pub fn run(args: TruthArgs) -> Result<()> {
    let mut config = HubConfig::from_args(&args.hub)?;
    config.apply_retention(&args.retention);
    config.validate()?;

    let paths = HubPaths::resolve(&args.hub, &config);
    paths.require(false)?;

    let session = Session::open(config, &paths)?;
    let dir = args
        .output_path
        .join(format!("{}_truth", session.config.family.as_str()));
    ensure_directory(&dir)?;

    let written = write_truth_payloads(&dir, &session)?;
    info!(dir = %dir.display(), payloads = written, "truth export completed");

    Ok(())
}

/// One payload per location with observations, registry-resolved or not.
pub fn write_truth_payloads(dir: &Path, session: &Session) -> Result<usize> {
    let targets: Vec<EmissionTarget> = session
        .truth
        .iter()
        .map(|(_, truth)| EmissionTarget {
            metadata: truth.metadata.clone(),
            registered: truth.resolved,
        })
        .collect();
    let paths = assign_payload_paths(dir, &targets, "truth");

    let mut written = 0;
    for (target, path) in targets.iter().zip(&paths) {
        let payload = TruthPayload {
            metadata: target.metadata.clone(),
            ground_truth: session.truth.view_for(&target.metadata.location),
        };
        write_json_compact(path, &payload)?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::{Value, json};
    use tempfile::TempDir;

    use super::*;
    use crate::cli::{HubArgs, RetentionArgs};
    use crate::config::ForecastFamily;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write fixture");
    }

    fn rsv_hub() -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        write(
            &dir.path().join("auxiliary-data/location_census/locations.csv"),
            "abbreviation,location,location_name,population\n\
US,US,US,334914895\n\
CA,06,California,39029342\n",
        );
        write(
            &dir.path().join("target-data/rsvnet_hospitalization.csv"),
            "date,location,age_group,target,value\n\
2024-11-02,06,0-0.49,inc hosp,2\n\
2024-11-02,06,0.5-0.99,inc hosp,3\n\
2024-11-02,06,0-130,inc hosp,40\n\
2024-11-02,06,0-130,inc rate,1.1\n\
2024-11-02,GU,0-130,inc hosp,1\n",
        );
        dir
    }

    #[test]
    fn truth_export_writes_observed_locations_only() {
        let hub = rsv_hub();
        let output = hub.path().join("processed");
        run(TruthArgs {
            hub: HubArgs {
                hub_path: hub.path().to_path_buf(),
                family: ForecastFamily::Rsv,
                config: None,
                target_data: None,
                locations: None,
            },
            output_path: output.clone(),
            retention: RetentionArgs {
                truth_since: None,
                full_history: false,
            },
        })
        .expect("truth export succeeds");

        let dir = output.join("rsv_truth");
        let mut files: Vec<String> = fs::read_dir(&dir)
            .expect("list output")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["CA_truth.json", "GU_truth.json"]);

        let raw = fs::read(dir.join("CA_truth.json")).expect("read payload");
        let payload: Value = serde_json::from_slice(&raw).expect("valid json");
        assert_eq!(payload["metadata"]["location"], json!("06"));
        assert_eq!(
            payload["ground_truth"]["0-0.99"],
            json!({"dates": ["2024-11-02"], "values": [5.0]})
        );
        assert_eq!(payload["ground_truth"]["0-130"]["values"], json!([40.0]));
    }
}
