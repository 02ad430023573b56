use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::commands::Session;
use crate::index::{AggregationIndex, ModelMap};
use crate::model::{
    LocationMetadata, LocationPayload, Manifest, ModelPredictionsView, TargetView,
};
use crate::util::{format_date, last_updated_string, write_json_compact};

/// A location to write, and whether its metadata came from the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionTarget {
    pub metadata: LocationMetadata,
    pub registered: bool,
}

/// Every registry location, then truth-only and forecast-only locations the
/// registry does not know, each with fallback metadata. Sorted by code.
pub fn emission_targets(session: &Session, index: &AggregationIndex) -> Vec<EmissionTarget> {
    let mut targets: BTreeMap<String, EmissionTarget> = session
        .registry
        .entries()
        .iter()
        .map(|entry| {
            (
                entry.location.clone(),
                EmissionTarget {
                    metadata: entry.clone(),
                    registered: true,
                },
            )
        })
        .collect();

    for (code, truth) in session.truth.iter() {
        targets
            .entry(code.to_string())
            .or_insert_with(|| EmissionTarget {
                metadata: truth.metadata.clone(),
                registered: truth.resolved,
            });
    }
    for code in index.location_codes() {
        targets
            .entry(code.to_string())
            .or_insert_with(|| EmissionTarget {
                metadata: LocationMetadata::fallback(code),
                registered: false,
            });
    }

    let fallback: Vec<&str> = targets
        .values()
        .filter(|target| !target.registered)
        .map(|target| target.metadata.location.as_str())
        .collect();
    if !fallback.is_empty() {
        warn!(
            count = fallback.len(),
            locations = ?fallback,
            "locations not in registry, using fallback metadata"
        );
    }

    targets.into_values().collect()
}

pub fn build_payload(
    metadata: &LocationMetadata,
    session: &Session,
    index: &AggregationIndex,
    all_models: &[String],
) -> LocationPayload {
    let code = metadata.location.as_str();
    let by_age_group = session.config.has_age_groups();

    let forecasts = index
        .location(code)
        .into_iter()
        .flatten()
        .map(|(reference_date, targets)| {
            let targets = targets
                .iter()
                .map(|(target, age_groups)| {
                    let view = if by_age_group {
                        TargetView::ByAgeGroup(
                            age_groups
                                .iter()
                                .map(|(age_group, models)| {
                                    (
                                        age_group.clone().unwrap_or_else(|| "all".to_string()),
                                        models_view(models),
                                    )
                                })
                                .collect(),
                        )
                    } else {
                        TargetView::Models(
                            age_groups
                                .get(&None)
                                .map(models_view)
                                .unwrap_or_default(),
                        )
                    };
                    (target.clone(), view)
                })
                .collect();
            (format_date(*reference_date), targets)
        })
        .collect();

    LocationPayload {
        metadata: metadata.clone(),
        ground_truth: session.truth.view_for(code),
        forecasts,
        available_models: index.models_for(code).into_iter().collect(),
        all_models: all_models.to_vec(),
    }
}

fn models_view(models: &ModelMap) -> ModelPredictionsView {
    models
        .iter()
        .map(|(model, horizons)| {
            (
                model.clone(),
                horizons
                    .iter()
                    .map(|(horizon, leaf)| (horizon.to_string(), leaf.prediction().to_view()))
                    .collect(),
            )
        })
        .collect()
}

fn payload_stem(metadata: &LocationMetadata) -> String {
    metadata
        .file_stem()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

/// One distinct file per target, in target order. Registry locations claim
/// their names first; a later claimant of a taken name gets a numbered stem.
pub fn assign_payload_paths(
    dir: &Path,
    targets: &[EmissionTarget],
    suffix: &str,
) -> Vec<PathBuf> {
    let mut taken = BTreeSet::new();
    let mut paths = vec![PathBuf::new(); targets.len()];

    let registered_first = targets
        .iter()
        .enumerate()
        .filter(|(_, target)| target.registered)
        .chain(targets.iter().enumerate().filter(|(_, target)| !target.registered));

    for (idx, target) in registered_first {
        let stem = payload_stem(&target.metadata);
        let mut path = dir.join(format!("{stem}_{suffix}.json"));
        let mut attempt = 2;
        while !taken.insert(path.clone()) {
            path = dir.join(format!("{stem}-{attempt}_{suffix}.json"));
            attempt += 1;
        }
        if attempt > 2 {
            warn!(
                location = %target.metadata.location,
                path = %path.display(),
                "payload file name already taken, using a numbered name"
            );
        }
        paths[idx] = path;
    }

    paths
}

/// Writes one payload per emission target and returns the count.
pub fn write_payloads(
    dir: &Path,
    session: &Session,
    index: &AggregationIndex,
    targets: &[EmissionTarget],
) -> Result<usize> {
    let all_models: Vec<String> = index.models().into_iter().collect();
    let paths = assign_payload_paths(dir, targets, session.config.family.as_str());

    let mut written = 0;
    for (target, path) in targets.iter().zip(&paths) {
        let payload = build_payload(&target.metadata, session, index, &all_models);
        write_json_compact(path, &payload)?;
        debug!(location = %target.metadata.location, path = %path.display(), "wrote payload");
        written += 1;
    }

    info!(dir = %dir.display(), payloads = written, "wrote location payloads");
    Ok(written)
}

pub fn build_manifest(
    session: &Session,
    index: &AggregationIndex,
    targets: &[EmissionTarget],
    demo_mode: bool,
) -> Manifest {
    let config = &session.config;
    Manifest {
        last_updated: last_updated_string(Utc::now()),
        family: config.family.as_str().to_string(),
        models: index.models().into_iter().collect(),
        locations: targets.iter().map(|target| target.metadata.clone()).collect(),
        location_count: targets.len(),
        demo_mode,
        age_groups: if config.has_age_groups() {
            config.accepted_age_groups.clone()
        } else {
            None
        },
    }
}
