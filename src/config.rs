use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize};

use crate::cli::{HubArgs, RetentionArgs};

pub const CANONICAL_QUANTILES: [f64; 5] = [0.025, 0.25, 0.5, 0.75, 0.975];
pub const DEFAULT_WORKERS: usize = 4;

const RSV_AGE_GROUPS: [&str; 10] = [
    "0-0.99", "1-4", "5-64", "65-130", "0-130", "0-0.49", "0.5-0.99", "1-1.99", "2-4", "18-130",
];

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastFamily {
    #[default]
    Flusight,
    Rsv,
}

impl ForecastFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flusight => "flusight",
            Self::Rsv => "rsv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubLayout {
    pub model_output_dir: PathBuf,
    pub target_data_path: PathBuf,
    pub locations_path: PathBuf,
}

impl Default for HubLayout {
    fn default() -> Self {
        Self {
            model_output_dir: PathBuf::from("model-output"),
            target_data_path: PathBuf::from("target-data/target-hospital-admissions.csv"),
            locations_path: PathBuf::from("auxiliary-data/locations.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastColumns {
    pub location: String,
    /// Accepted names for the reference date, first present wins.
    pub reference_date: Vec<String>,
    pub target: String,
    pub age_group: Option<String>,
    pub horizon: String,
    pub output_type: String,
    pub output_type_id: String,
    pub value: String,
    pub target_end_date: String,
}

impl Default for ForecastColumns {
    fn default() -> Self {
        Self {
            location: "location".to_string(),
            reference_date: vec!["reference_date".to_string()],
            target: "target".to_string(),
            age_group: None,
            horizon: "horizon".to_string(),
            output_type: "output_type".to_string(),
            output_type_id: "output_type_id".to_string(),
            value: "value".to_string(),
            target_end_date: "target_end_date".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryColumns {
    pub location: String,
    pub abbreviation: String,
    pub location_name: String,
    pub population: String,
}

impl Default for RegistryColumns {
    fn default() -> Self {
        Self {
            location: "location".to_string(),
            abbreviation: "abbreviation".to_string(),
            location_name: "location_name".to_string(),
            population: "population".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeRollup {
    pub bucket: String,
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TruthConfig {
    pub location_column: String,
    pub date_column: String,
    pub value_column: String,
    pub target_column: String,
    pub target_filter: Option<String>,
    pub age_group_column: Option<String>,
    pub rate_column: Option<String>,
    /// Observations dated before this are discarded. Accepts a TOML date
    /// or a quoted `YYYY-MM-DD` string.
    #[serde(deserialize_with = "deserialize_since")]
    pub since: Option<NaiveDate>,
    /// Ignores `since` and keeps every observation.
    pub full_history: bool,
    pub rollups: Vec<AgeRollup>,
}

impl Default for TruthConfig {
    fn default() -> Self {
        Self {
            location_column: "location".to_string(),
            date_column: "date".to_string(),
            value_column: "value".to_string(),
            target_column: "target".to_string(),
            target_filter: None,
            age_group_column: None,
            rate_column: Some("weekly_rate".to_string()),
            since: NaiveDate::from_ymd_opt(2023, 10, 1),
            full_history: false,
            rollups: Vec::new(),
        }
    }
}

impl TruthConfig {
    pub fn cutoff(&self) -> Option<NaiveDate> {
        if self.full_history { None } else { self.since }
    }
}

fn deserialize_since<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let date = match Option::<toml::Value>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(toml::Value::String(raw)) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|err| D::Error::custom(format!("invalid date '{raw}': {err}")))?,
        Some(toml::Value::Datetime(datetime)) => {
            let date = datetime
                .date
                .ok_or_else(|| D::Error::custom("since must carry a calendar date"))?;
            NaiveDate::from_ymd_opt(
                i32::from(date.year),
                u32::from(date.month),
                u32::from(date.day),
            )
            .ok_or_else(|| D::Error::custom(format!("invalid date {date}")))?
        }
        Some(other) => {
            return Err(D::Error::custom(format!(
                "since must be a date, got {}",
                other.type_str()
            )));
        }
    };
    Ok(Some(date))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub family: ForecastFamily,
    pub layout: HubLayout,
    pub columns: ForecastColumns,
    pub registry: RegistryColumns,
    pub truth: TruthConfig,
    pub extensions: Vec<String>,
    pub keep_samples: bool,
    /// `None` retains every quantile level.
    pub retained_quantiles: Option<Vec<f64>>,
    pub pmf_category_order: BTreeMap<String, Vec<String>>,
    pub accepted_age_groups: Option<Vec<String>>,
    pub horizon_period_days: i64,
    pub demo_models: Vec<String>,
    pub workers: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::preset(ForecastFamily::Flusight)
    }
}

impl HubConfig {
    pub fn preset(family: ForecastFamily) -> Self {
        match family {
            ForecastFamily::Flusight => flusight_preset(),
            ForecastFamily::Rsv => rsv_preset(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: HubConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_args(args: &HubArgs) -> Result<Self> {
        let config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::preset(args.family),
        };
        if args.config.is_some() && config.family != args.family {
            tracing::warn!(
                file_family = config.family.as_str(),
                flag_family = args.family.as_str(),
                "config file family overrides --family"
            );
        }
        Ok(config)
    }

    pub fn apply_retention(&mut self, retention: &RetentionArgs) {
        if retention.full_history {
            self.truth.full_history = true;
        } else if let Some(since) = retention.truth_since {
            self.truth.since = Some(since);
            self.truth.full_history = false;
        }
    }

    pub fn has_age_groups(&self) -> bool {
        self.columns.age_group.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.columns.reference_date.is_empty() {
            bail!("at least one reference date column name is required");
        }
        if self.horizon_period_days <= 0 {
            bail!("horizon_period_days must be positive");
        }
        if let Some(levels) = &self.retained_quantiles {
            if let Some(level) = levels.iter().find(|level| !(0.0..=1.0).contains(*level)) {
                bail!("retained quantile level {level} is outside [0, 1]");
            }
        }
        Ok(())
    }

    pub fn retains_quantile(&self, level: f64) -> bool {
        match &self.retained_quantiles {
            Some(levels) => levels.iter().any(|kept| (kept - level).abs() < 1e-9),
            None => true,
        }
    }

    pub fn accepts_age_group(&self, age_group: &str) -> bool {
        match &self.accepted_age_groups {
            Some(groups) => groups.iter().any(|group| group == age_group),
            None => true,
        }
    }

    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(extension))
    }
}

fn flusight_preset() -> HubConfig {
    let mut pmf_category_order = BTreeMap::new();
    pmf_category_order.insert(
        "wk flu hosp rate change".to_string(),
        ["large_decrease", "decrease", "stable", "increase", "large_increase"]
            .into_iter()
            .map(str::to_string)
            .collect(),
    );

    HubConfig {
        family: ForecastFamily::Flusight,
        layout: HubLayout::default(),
        columns: ForecastColumns::default(),
        registry: RegistryColumns::default(),
        truth: TruthConfig::default(),
        extensions: vec!["csv".to_string(), "parquet".to_string()],
        keep_samples: false,
        retained_quantiles: Some(CANONICAL_QUANTILES.to_vec()),
        pmf_category_order,
        accepted_age_groups: None,
        horizon_period_days: 7,
        demo_models: vec![
            "UNC_IDD-influpaint".to_string(),
            "FluSight-ensemble".to_string(),
        ],
        workers: DEFAULT_WORKERS,
    }
}

fn rsv_preset() -> HubConfig {
    let age_groups: Vec<String> = RSV_AGE_GROUPS.iter().map(|g| g.to_string()).collect();

    HubConfig {
        family: ForecastFamily::Rsv,
        layout: HubLayout {
            model_output_dir: PathBuf::from("model-output"),
            target_data_path: PathBuf::from("target-data/rsvnet_hospitalization.csv"),
            locations_path: PathBuf::from("auxiliary-data/location_census/locations.csv"),
        },
        columns: ForecastColumns {
            reference_date: vec!["origin_date".to_string(), "forecast_date".to_string()],
            age_group: Some("age_group".to_string()),
            ..ForecastColumns::default()
        },
        registry: RegistryColumns::default(),
        truth: TruthConfig {
            target_filter: Some("inc hosp".to_string()),
            age_group_column: Some("age_group".to_string()),
            rate_column: None,
            rollups: vec![
                AgeRollup {
                    bucket: "0-0.99".to_string(),
                    parts: vec!["0-0.49".to_string(), "0.5-0.99".to_string()],
                },
                AgeRollup {
                    bucket: "1-4".to_string(),
                    parts: vec!["1-1.99".to_string(), "2-4".to_string()],
                },
            ],
            ..TruthConfig::default()
        },
        extensions: vec!["parquet".to_string(), "csv".to_string()],
        keep_samples: false,
        retained_quantiles: Some(CANONICAL_QUANTILES.to_vec()),
        pmf_category_order: BTreeMap::new(),
        accepted_age_groups: Some(age_groups),
        horizon_period_days: 7,
        demo_models: Vec::new(),
        workers: DEFAULT_WORKERS,
    }
}

/// Input locations for one run, resolved against the hub root.
#[derive(Debug, Clone)]
pub struct HubPaths {
    pub hub_root: PathBuf,
    pub model_output: PathBuf,
    pub target_data: PathBuf,
    pub locations: PathBuf,
}

impl HubPaths {
    pub fn resolve(args: &HubArgs, config: &HubConfig) -> Self {
        let hub_root = args.hub_path.clone();
        Self {
            model_output: hub_root.join(&config.layout.model_output_dir),
            target_data: args
                .target_data
                .clone()
                .unwrap_or_else(|| hub_root.join(&config.layout.target_data_path)),
            locations: args
                .locations
                .clone()
                .unwrap_or_else(|| hub_root.join(&config.layout.locations_path)),
            hub_root,
        }
    }

    pub fn require(&self, include_model_output: bool) -> Result<()> {
        let mut required = vec![
            ("hub path", &self.hub_root),
            ("target data", &self.target_data),
            ("locations", &self.locations),
        ];
        if include_model_output {
            required.push(("model output directory", &self.model_output));
        }

        for (name, path) in required {
            if !path.exists() {
                bail!("{name} does not exist: {}", path.display());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_on_age_groups_and_reference_columns() {
        let flu = HubConfig::preset(ForecastFamily::Flusight);
        let rsv = HubConfig::preset(ForecastFamily::Rsv);

        assert!(!flu.has_age_groups());
        assert!(rsv.has_age_groups());
        assert_eq!(rsv.columns.reference_date[0], "origin_date");
        assert_eq!(rsv.truth.target_filter.as_deref(), Some("inc hosp"));
        assert!(rsv.accepts_age_group("0-0.49"));
        assert!(!rsv.accepts_age_group("65+"));
    }

    #[test]
    fn retains_only_canonical_levels_by_default() {
        let config = HubConfig::default();
        assert!(config.retains_quantile(0.025));
        assert!(config.retains_quantile(0.5));
        assert!(!config.retains_quantile(0.1));

        let all = HubConfig {
            retained_quantiles: None,
            ..HubConfig::default()
        };
        assert!(all.retains_quantile(0.1));
    }

    #[test]
    fn toml_overrides_fall_back_to_defaults() {
        let raw = r#"
            family = "flusight"
            keep_samples = true
            workers = 8

            [columns]
            location = "loc"
            reference_date = ["origin_date"]
        "#;

        let config: HubConfig = toml::from_str(raw).expect("config should parse");
        assert!(config.keep_samples);
        assert_eq!(config.workers, 8);
        assert_eq!(config.columns.location, "loc");
        assert_eq!(config.columns.horizon, "horizon");
        assert_eq!(config.truth.date_column, "date");
        config.validate().expect("config should validate");
    }

    #[test]
    fn truth_since_accepts_toml_dates_and_quoted_strings() {
        let bare: HubConfig =
            toml::from_str("[truth]\nsince = 2024-08-01\n").expect("bare date parses");
        let quoted: HubConfig =
            toml::from_str("[truth]\nsince = \"2024-08-01\"\n").expect("quoted date parses");

        let expected = NaiveDate::from_ymd_opt(2024, 8, 1);
        assert_eq!(bare.truth.cutoff(), expected);
        assert_eq!(quoted.truth.cutoff(), expected);
        assert!(toml::from_str::<HubConfig>("[truth]\nsince = 7\n").is_err());
    }

    #[test]
    fn full_history_can_be_requested_from_toml_or_flags() {
        let config: HubConfig =
            toml::from_str("[truth]\nfull_history = true\n").expect("config parses");
        assert_eq!(config.truth.cutoff(), None);

        let mut preset = HubConfig::default();
        assert_eq!(preset.truth.cutoff(), NaiveDate::from_ymd_opt(2023, 10, 1));
        preset.apply_retention(&RetentionArgs {
            truth_since: None,
            full_history: true,
        });
        assert_eq!(preset.truth.cutoff(), None);

        let since = NaiveDate::from_ymd_opt(2024, 1, 1);
        preset.apply_retention(&RetentionArgs {
            truth_since: since,
            full_history: false,
        });
        assert_eq!(preset.truth.cutoff(), since);
    }

    #[test]
    fn validate_rejects_out_of_range_levels() {
        let config = HubConfig {
            retained_quantiles: Some(vec![0.5, 1.5]),
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
