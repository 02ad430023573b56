use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::commands::inventory::ModelFiles;
use crate::config::HubConfig;
use crate::index::AggregationIndex;
use crate::locations::LocationRegistry;
use crate::model::{FailedFile, RowCounts};
use crate::normalize::{NormalizedFile, normalize_file};
use crate::table::FileError;

/// One input file; `rank` is its position in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub rank: usize,
    pub model: String,
    pub path: PathBuf,
}

pub fn plan(models: Vec<ModelFiles>) -> Vec<WorkItem> {
    models
        .into_iter()
        .flat_map(|model_files| {
            let model = model_files.model;
            model_files
                .files
                .into_iter()
                .map(move |path| (model.clone(), path))
        })
        .enumerate()
        .map(|(rank, (model, path))| WorkItem { rank, model, path })
        .collect()
}

#[derive(Debug, Default)]
pub struct Aggregation {
    pub index: AggregationIndex,
    pub files_normalized: usize,
    pub predictions_merged: usize,
    pub relabeled_locations: usize,
    pub rows: RowCounts,
    pub failed: Vec<FailedFile>,
}

impl Aggregation {
    fn absorb(&mut self, file: NormalizedFile, rank: usize) {
        self.files_normalized += 1;
        self.rows.absorb(&file.counts);
        self.predictions_merged += self.index.merge(file, rank);
    }

    fn record_failure(&mut self, item: &WorkItem, err: &FileError) {
        self.failed.push(FailedFile {
            model: item.model.clone(),
            path: item.path.display().to_string(),
            kind: err.kind().to_string(),
            reason: err.to_string(),
        });
    }
}

/// Rewrites forecast locations given by abbreviation to their registry code
/// so both spellings land on one index entry. Returns the rewritten count.
pub fn canonicalize_locations(file: &mut NormalizedFile, registry: &LocationRegistry) -> usize {
    let mut rewritten = 0;
    for (key, _) in &mut file.predictions {
        if let Some(entry) = registry.find(&key.location) {
            if entry.location != key.location {
                key.location = entry.location.clone();
                rewritten += 1;
            }
        }
    }
    rewritten
}

/// Normalizes every work item on a bounded pool and merges the results into
/// one index. A file that fails is logged and recorded, never fatal.
pub fn aggregate(
    work: &[WorkItem],
    config: &HubConfig,
    registry: &LocationRegistry,
) -> Result<Aggregation> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .context("failed to build normalization worker pool")?;

    info!(files = work.len(), workers = config.workers, "normalizing model files");

    let shared = Mutex::new(Aggregation::default());
    pool.install(|| {
        work.par_iter().for_each(|item| {
            let outcome = normalize_file(&item.path, &item.model, config).map(|mut file| {
                let relabeled = canonicalize_locations(&mut file, registry);
                (file, relabeled)
            });
            let mut aggregation = shared.lock().unwrap_or_else(PoisonError::into_inner);
            match outcome {
                Ok((file, relabeled)) => {
                    if file.counts.dropped() > 0 {
                        warn!(
                            path = %file.path.display(),
                            model = %file.model,
                            rows = file.counts.rows_read,
                            dropped = file.counts.dropped(),
                            "dropped rows while normalizing file"
                        );
                    }
                    if relabeled > 0 {
                        debug!(
                            path = %file.path.display(),
                            predictions = relabeled,
                            "mapped location abbreviations to registry codes"
                        );
                    }
                    debug!(path = %file.path.display(), rank = item.rank, "merging file");
                    aggregation.relabeled_locations += relabeled;
                    aggregation.absorb(file, item.rank);
                }
                Err(err) => {
                    warn!(
                        path = %item.path.display(),
                        model = %item.model,
                        kind = err.kind(),
                        error = %err,
                        "skipping file"
                    );
                    aggregation.record_failure(item, &err);
                }
            }
        });
    });

    let mut aggregation = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
    aggregation.failed.sort_by(|a, b| a.path.cmp(&b.path));

    info!(
        normalized = aggregation.files_normalized,
        failed = aggregation.failed.len(),
        predictions = aggregation.index.len(),
        "aggregation complete"
    );

    Ok(aggregation)
}
