use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AgeRollup, HubConfig};
use crate::locations::LocationRegistry;
use crate::model::{GroundTruthSeries, GroundTruthView, LocationMetadata};
use crate::table::RawTable;
use crate::util::{format_date, parse_calendar_date, parse_number};


#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TruthCounts {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub skipped_target: usize,
    pub skipped_missing_location: usize,
    pub skipped_bad_date: usize,
    pub skipped_before_cutoff: usize,
    pub skipped_age_group: usize,
    pub null_values: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationTruth {
    pub metadata: LocationMetadata,
    /// False when the raw identifier had no registry entry.
    pub resolved: bool,
    pub series: BTreeMap<Option<String>, GroundTruthSeries>,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    date: NaiveDate,
    value: Option<f64>,
    rate: Option<f64>,
}

struct PendingLocation {
    metadata: LocationMetadata,
    resolved: bool,
    groups: BTreeMap<Option<String>, Vec<Observation>>,
}

/// Observed series keyed by registry code, or by the raw identifier when
/// the registry has no match. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    locations: BTreeMap<String, LocationTruth>,
    by_age_group: bool,
    counts: TruthCounts,
}

impl GroundTruth {
    pub fn load(path: &Path, config: &HubConfig, registry: &LocationRegistry) -> Result<Self> {
        info!(path = %path.display(), "loading ground truth");
        let table = RawTable::read(path)
            .with_context(|| format!("failed to load ground truth {}", path.display()))?;
        let truth = Self::from_table(&table, path, config, registry)?;

        info!(
            locations = truth.locations.len(),
            rows = truth.counts.rows_read,
            kept = truth.counts.rows_kept,
            before_cutoff = truth.counts.skipped_before_cutoff,
            null_values = truth.counts.null_values,
            since = %config
                .truth
                .cutoff()
                .map(format_date)
                .unwrap_or_else(|| "full history".to_string()),
            "loaded ground truth"
        );
        Ok(truth)
    }

    pub fn from_table(
        table: &RawTable,
        path: &Path,
        config: &HubConfig,
        registry: &LocationRegistry,
    ) -> Result<Self> {
        let truth = &config.truth;
        let required = |name: &str| {
            table.column_index(name).with_context(|| {
                format!("ground truth {} has no '{name}' column", path.display())
            })
        };

        let location_idx = required(&truth.location_column)?;
        let date_idx = required(&truth.date_column)?;
        let value_idx = required(&truth.value_column)?;
        let age_idx = match &truth.age_group_column {
            Some(column) => Some(required(column)?),
            None => None,
        };
        let rate_idx = truth
            .rate_column
            .as_deref()
            .and_then(|column| table.column_index(column));

        let target_filter = match &truth.target_filter {
            Some(filter) => match table.column_index(&truth.target_column) {
                Some(idx) => Some((idx, filter.as_str())),
                None => {
                    warn!(
                        path = %path.display(),
                        column = %truth.target_column,
                        "target column missing, ground truth is not filtered by target"
                    );
                    None
                }
            },
            None => None,
        };

        let cutoff = truth.cutoff();
        let mut counts = TruthCounts::default();
        let mut resolved_ids: HashMap<String, (String, LocationMetadata, bool)> = HashMap::new();
        let mut pending: BTreeMap<String, PendingLocation> = BTreeMap::new();

        for row in table.rows() {
            counts.rows_read += 1;

            if let Some((idx, filter)) = target_filter {
                if row.get(idx) != Some(filter) {
                    counts.skipped_target += 1;
                    continue;
                }
            }

            let Some(raw_location) = row.get(location_idx) else {
                counts.skipped_missing_location += 1;
                continue;
            };
            let Some(date) = row.get(date_idx).and_then(parse_calendar_date) else {
                counts.skipped_bad_date += 1;
                continue;
            };
            if cutoff.is_some_and(|since| date < since) {
                counts.skipped_before_cutoff += 1;
                continue;
            }

            let age_group = match age_idx {
                Some(idx) => match row.get(idx) {
                    Some(group) if config.accepts_age_group(group) => Some(group.to_string()),
                    _ => {
                        counts.skipped_age_group += 1;
                        continue;
                    }
                },
                None => None,
            };

            let value = parse_number(row.get(value_idx));
            if value.is_none() {
                counts.null_values += 1;
            }
            let rate = parse_number(row.get_opt(rate_idx));

            let (key, metadata, resolved) = resolved_ids
                .entry(raw_location.to_string())
                .or_insert_with(|| match registry.find(raw_location) {
                    Some(entry) => (entry.location.clone(), entry.clone(), true),
                    None => {
                        warn!(
                            location = raw_location,
                            "ground truth location not in registry, keeping raw identifier"
                        );
                        (
                            raw_location.to_string(),
                            LocationMetadata::fallback(raw_location),
                            false,
                        )
                    }
                })
                .clone();

            counts.rows_kept += 1;
            pending
                .entry(key)
                .or_insert_with(|| PendingLocation {
                    metadata,
                    resolved,
                    groups: BTreeMap::new(),
                })
                .groups
                .entry(age_group)
                .or_default()
                .push(Observation { date, value, rate });
        }

        let with_rates = rate_idx.is_some();
        let locations = pending
            .into_iter()
            .map(|(key, mut location)| {
                if age_idx.is_some() {
                    apply_rollups(&mut location.groups, &truth.rollups);
                }
                let series = location
                    .groups
                    .into_iter()
                    .map(|(age_group, observations)| {
                        (age_group, build_series(observations, with_rates))
                    })
                    .collect();
                (
                    key,
                    LocationTruth {
                        metadata: location.metadata,
                        resolved: location.resolved,
                        series,
                    },
                )
            })
            .collect();

        Ok(Self {
            locations,
            by_age_group: age_idx.is_some(),
            counts,
        })
    }

    pub fn get(&self, location: &str) -> Option<&LocationTruth> {
        self.locations.get(location)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LocationTruth)> {
        self.locations
            .iter()
            .map(|(key, truth)| (key.as_str(), truth))
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn counts(&self) -> &TruthCounts {
        &self.counts
    }

    /// Sanitized output shape for one location; empty when nothing was
    /// observed there.
    pub fn view_for(&self, location: &str) -> GroundTruthView {
        let series = self.get(location).map(|truth| &truth.series);
        if self.by_age_group {
            GroundTruthView::ByAgeGroup(
                series
                    .into_iter()
                    .flatten()
                    .map(|(age_group, series)| {
                        (
                            age_group.clone().unwrap_or_else(|| "all".to_string()),
                            series.sanitized(),
                        )
                    })
                    .collect(),
            )
        } else {
            GroundTruthView::Series(
                series
                    .and_then(|series| series.get(&None))
                    .map(GroundTruthSeries::sanitized)
                    .unwrap_or_default(),
            )
        }
    }
}

fn build_series(mut observations: Vec<Observation>, with_rates: bool) -> GroundTruthSeries {
    observations.sort_by_key(|observation| observation.date);
    GroundTruthSeries {
        dates: observations
            .iter()
            .map(|observation| format_date(observation.date))
            .collect(),
        values: observations.iter().map(|observation| observation.value).collect(),
        rates: with_rates.then(|| {
            observations
                .iter()
                .map(|observation| observation.rate)
                .collect()
        }),
    }
}

/// Synthesizes each coarse bucket the source did not report by summing its
/// parts date by date; a date where any part is missing or null sums to null.
fn apply_rollups(groups: &mut BTreeMap<Option<String>, Vec<Observation>>, rollups: &[AgeRollup]) {
    for rollup in rollups {
        let bucket = Some(rollup.bucket.clone());
        if groups.contains_key(&bucket) {
            continue;
        }

        let parts: Vec<BTreeMap<NaiveDate, Option<f64>>> = rollup
            .parts
            .iter()
            .filter_map(|part| groups.get(&Some(part.clone())))
            .map(|observations| {
                observations
                    .iter()
                    .map(|observation| (observation.date, observation.value))
                    .collect()
            })
            .collect();
        if parts.is_empty() {
            continue;
        }
        let complete = parts.len() == rollup.parts.len();

        let mut dates: Vec<NaiveDate> =
            parts.iter().flat_map(|part| part.keys().copied()).collect();
        dates.sort();
        dates.dedup();

        let observations = dates
            .into_iter()
            .map(|date| {
                let value = if complete {
                    parts
                        .iter()
                        .map(|part| part.get(&date).copied().flatten())
                        .sum::<Option<f64>>()
                } else {
                    None
                };
                Observation {
                    date,
                    value,
                    rate: None,
                }
            })
            .collect();

        groups.insert(bucket, observations);
    }
}
