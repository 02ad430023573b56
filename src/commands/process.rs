mod emit;
mod schedule;

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::ProcessArgs;
use crate::commands::Session;
use crate::commands::inventory::{discover_model_files, model_filter};
use crate::config::{HubConfig, HubPaths};
use crate::model::{RunCounts, RunPaths, RunReport};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub use emit::{EmissionTarget, assign_payload_paths};

pub fn run(args: ProcessArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let mut config = HubConfig::from_args(&args.hub)?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let paths = HubPaths::resolve(&args.hub, &config);
    paths.require(true)?;

    let filter = selected_models(&args, &config);
    let session = Session::open(config, &paths)?;

    let discovered = discover_model_files(&paths.model_output, &session.config, filter.as_ref())?;
    let models_discovered = discovered.len();
    let work = schedule::plan(discovered);
    info!(
        run_id = %run_id,
        models = models_discovered,
        files = work.len(),
        "discovered model files"
    );

    let aggregation = schedule::aggregate(&work, &session.config, &session.registry)?;

    let family_dir = args.output_path.join(session.config.family.as_str());
    ensure_directory(&family_dir)?;

    let targets = emit::emission_targets(&session, &aggregation.index);
    let fallback_locations = targets.iter().filter(|target| !target.registered).count();
    let payloads_written =
        emit::write_payloads(&family_dir, &session, &aggregation.index, &targets)?;

    let manifest = emit::build_manifest(&session, &aggregation.index, &targets, args.demo);
    let manifest_path = family_dir.join("metadata.json");
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote manifest");

    let mut warnings = Vec::new();
    if !aggregation.failed.is_empty() {
        warnings.push(format!(
            "{} of {} model files could not be normalized",
            aggregation.failed.len(),
            work.len()
        ));
    }
    if fallback_locations > 0 {
        warnings.push(format!(
            "{fallback_locations} locations are not in the location registry"
        ));
    }
    if aggregation.index.is_empty() {
        warnings.push("no predictions were indexed".to_string());
    }
    for warning in &warnings {
        warn!(warning = %warning, "run warning");
    }

    let report = RunReport {
        manifest_version: 1,
        run_id,
        family: session.config.family.as_str().to_string(),
        status: if aggregation.failed.is_empty() {
            "completed".to_string()
        } else {
            "completed_with_failures".to_string()
        },
        started_at,
        finished_at: now_utc_string(),
        demo_mode: args.demo,
        paths: RunPaths {
            hub_root: paths.hub_root.display().to_string(),
            model_output: paths.model_output.display().to_string(),
            target_data: paths.target_data.display().to_string(),
            locations: paths.locations.display().to_string(),
            output_dir: family_dir.display().to_string(),
        },
        counts: RunCounts {
            models_discovered,
            files_discovered: work.len(),
            files_normalized: aggregation.files_normalized,
            files_failed: aggregation.failed.len(),
            predictions_merged: aggregation.predictions_merged,
            predictions_indexed: aggregation.index.len(),
            truth_locations: session.truth.len(),
            relabeled_locations: aggregation.relabeled_locations,
            fallback_locations,
            payloads_written,
            rows: aggregation.rows,
        },
        failed_files: aggregation.failed,
        warnings,
    };

    let report_path = family_dir.join("run_report.json");
    write_json_pretty(&report_path, &report)?;
    info!(path = %report_path.display(), "wrote run report");
    info!(
        status = %report.status,
        payloads = payloads_written,
        models = manifest.models.len(),
        "process completed"
    );

    Ok(())
}

fn apply_overrides(config: &mut HubConfig, args: &ProcessArgs) {
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if args.all_quantiles {
        config.retained_quantiles = None;
    }
    if args.keep_samples {
        config.keep_samples = true;
    }
    config.apply_retention(&args.retention);
}

/// Explicit `--model` names win over the demo list.
fn selected_models(args: &ProcessArgs, config: &HubConfig) -> Option<BTreeSet<String>> {
    if !args.models.is_empty() {
        return model_filter(&args.models);
    }
    if args.demo {
        if config.demo_models.is_empty() {
            warn!(
                family = config.family.as_str(),
                "no demo models configured for family, processing every model"
            );
            return None;
        }
        info!(models = ?config.demo_models, "demo mode");
        return model_filter(&config.demo_models);
    }
    None
}
