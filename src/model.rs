use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::util::finite_or_none;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMetadata {
    pub location: String,
    pub abbreviation: String,
    pub location_name: String,
    pub population: f64,
}

impl LocationMetadata {
    pub fn fallback(raw: &str) -> Self {
        Self {
            location: raw.to_string(),
            abbreviation: raw.to_string(),
            location_name: raw.to_string(),
            population: 0.0,
        }
    }

    pub fn file_stem(&self) -> &str {
        let abbreviation = self.abbreviation.trim();
        if abbreviation.is_empty() {
            self.location.trim()
        } else {
            abbreviation
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFileEntry {
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub reference_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInventory {
    pub model: String,
    pub file_count: usize,
    pub files: Vec<ModelFileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub family: String,
    pub model_output_directory: String,
    pub model_count: usize,
    pub file_count: usize,
    pub models: Vec<ModelInventory>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthSeries {
    pub dates: Vec<String>,
    pub values: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rates: Option<Vec<Option<f64>>>,
}

impl GroundTruthSeries {
    pub fn sanitized(&self) -> Self {
        Self {
            dates: self.dates.clone(),
            values: sanitize_optional(&self.values),
            rates: self.rates.as_deref().map(sanitize_optional),
        }
    }
}

fn sanitize_optional(values: &[Option<f64>]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|value| value.and_then(finite_or_none))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GroundTruthView {
    Series(GroundTruthSeries),
    ByAgeGroup(BTreeMap<String, GroundTruthSeries>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PredictionView {
    Quantile {
        date: String,
        quantiles: Vec<f64>,
        values: Vec<Option<f64>>,
    },
    Pmf {
        date: String,
        categories: Vec<String>,
        probabilities: Vec<Option<f64>>,
    },
    Sample {
        date: String,
        samples: Vec<Option<f64>>,
    },
}

/// model -> horizon -> prediction
pub type ModelPredictionsView = BTreeMap<String, BTreeMap<String, PredictionView>>;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TargetView {
    Models(ModelPredictionsView),
    ByAgeGroup(BTreeMap<String, ModelPredictionsView>),
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationPayload {
    pub metadata: LocationMetadata,
    pub ground_truth: GroundTruthView,
    /// reference date -> target -> ...
    pub forecasts: BTreeMap<String, BTreeMap<String, TargetView>>,
    pub available_models: Vec<String>,
    pub all_models: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TruthPayload {
    pub metadata: LocationMetadata,
    pub ground_truth: GroundTruthView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub last_updated: String,
    pub family: String,
    pub models: Vec<String>,
    pub locations: Vec<LocationMetadata>,
    pub location_count: usize,
    pub demo_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_groups: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPaths {
    pub hub_root: String,
    pub model_output: String,
    pub target_data: String,
    pub locations: String,
    pub output_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowCounts {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub dropped_sample: usize,
    pub dropped_unsupported_type: usize,
    pub dropped_missing_field: usize,
    pub dropped_bad_date: usize,
    pub dropped_bad_horizon: usize,
    pub dropped_bad_type_id: usize,
    pub dropped_bad_value: usize,
    pub dropped_age_group: usize,
    pub dropped_mixed_type: usize,
    pub filtered_quantile_level: usize,
}

impl RowCounts {
    pub fn dropped(&self) -> usize {
        self.dropped_sample
            + self.dropped_unsupported_type
            + self.dropped_missing_field
            + self.dropped_bad_date
            + self.dropped_bad_horizon
            + self.dropped_bad_type_id
            + self.dropped_bad_value
            + self.dropped_age_group
            + self.dropped_mixed_type
            + self.filtered_quantile_level
    }

    pub fn absorb(&mut self, other: &RowCounts) {
        self.rows_read += other.rows_read;
        self.rows_kept += other.rows_kept;
        self.dropped_sample += other.dropped_sample;
        self.dropped_unsupported_type += other.dropped_unsupported_type;
        self.dropped_missing_field += other.dropped_missing_field;
        self.dropped_bad_date += other.dropped_bad_date;
        self.dropped_bad_horizon += other.dropped_bad_horizon;
        self.dropped_bad_type_id += other.dropped_bad_type_id;
        self.dropped_bad_value += other.dropped_bad_value;
        self.dropped_age_group += other.dropped_age_group;
        self.dropped_mixed_type += other.dropped_mixed_type;
        self.filtered_quantile_level += other.filtered_quantile_level;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub models_discovered: usize,
    pub files_discovered: usize,
    pub files_normalized: usize,
    pub files_failed: usize,
    pub predictions_merged: usize,
    pub predictions_indexed: usize,
    pub truth_locations: usize,
    #[serde(default)]
    pub relabeled_locations: usize,
    #[serde(default)]
    pub fallback_locations: usize,
    pub payloads_written: usize,
    pub rows: RowCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedFile {
    pub model: String,
    pub path: String,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub manifest_version: u32,
    pub run_id: String,
    pub family: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: String,
    pub demo_mode: bool,
    pub paths: RunPaths,
    pub counts: RunCounts,
    pub failed_files: Vec<FailedFile>,
    pub warnings: Vec<String>,
}
