use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::config::HubConfig;
use crate::model::RowCounts;
use crate::prediction::{
    Distribution, ForecastRecord, OutputKind, OutputTypeId, Prediction, PredictionKey,
    is_sample_tag,
};
use crate::table::{FileError, RawTable, Row};
use crate::util::{parse_calendar_date, parse_number};

#[cfg(test)]
mod tests;

/// Everything one input file contributes to the index.
#[derive(Debug, Clone)]
pub struct NormalizedFile {
    pub model: String,
    pub path: PathBuf,
    pub predictions: Vec<(PredictionKey, Prediction)>,
    pub counts: RowCounts,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RowDrop {
    Sample,
    UnsupportedType,
    MissingField,
    BadDate,
    BadHorizon,
    BadTypeId,
    BadValue,
    AgeGroup,
    QuantileLevel,
}

impl RowCounts {
    fn record_drop(&mut self, reason: RowDrop) {
        match reason {
            RowDrop::Sample => self.dropped_sample += 1,
            RowDrop::UnsupportedType => self.dropped_unsupported_type += 1,
            RowDrop::MissingField => self.dropped_missing_field += 1,
            RowDrop::BadDate => self.dropped_bad_date += 1,
            RowDrop::BadHorizon => self.dropped_bad_horizon += 1,
            RowDrop::BadTypeId => self.dropped_bad_type_id += 1,
            RowDrop::BadValue => self.dropped_bad_value += 1,
            RowDrop::AgeGroup => self.dropped_age_group += 1,
            RowDrop::QuantileLevel => self.filtered_quantile_level += 1,
        }
    }
}

struct ColumnLayout {
    location: usize,
    reference_date: usize,
    target: usize,
    age_group: Option<usize>,
    horizon: usize,
    output_type: usize,
    output_type_id: usize,
    value: usize,
    target_end_date: Option<usize>,
}

impl ColumnLayout {
    fn resolve(table: &RawTable, config: &HubConfig, path: &Path) -> Result<Self, FileError> {
        let columns = &config.columns;
        let mut missing = Vec::new();
        let mut require = |name: &str| {
            let idx = table.column_index(name);
            if idx.is_none() {
                missing.push(name.to_string());
            }
            idx.unwrap_or_default()
        };

        let location = require(&columns.location);
        let target = require(&columns.target);
        let horizon = require(&columns.horizon);
        let output_type = require(&columns.output_type);
        let output_type_id = require(&columns.output_type_id);
        let value = require(&columns.value);
        let age_group = columns.age_group.as_deref().map(&mut require);

        let reference_date = columns
            .reference_date
            .iter()
            .find_map(|name| table.column_index(name));
        if reference_date.is_none() {
            missing.push(columns.reference_date.join("|"));
        }

        if !missing.is_empty() {
            return Err(FileError::MissingColumns {
                path: path.to_path_buf(),
                columns: missing,
            });
        }

        Ok(Self {
            location,
            reference_date: reference_date.unwrap_or_default(),
            target,
            age_group,
            horizon,
            output_type,
            output_type_id,
            value,
            target_end_date: table.column_index(&columns.target_end_date),
        })
    }
}

pub fn normalize_file(
    path: &Path,
    model: &str,
    config: &HubConfig,
) -> Result<NormalizedFile, FileError> {
    let table = RawTable::read(path)?;
    normalize_table(&table, path, model, config)
}

pub fn normalize_table(
    table: &RawTable,
    path: &Path,
    model: &str,
    config: &HubConfig,
) -> Result<NormalizedFile, FileError> {
    let layout = ColumnLayout::resolve(table, config, path)?;
    let mut counts = RowCounts::default();
    let mut records = Vec::with_capacity(table.len());

    for row in table.rows() {
        counts.rows_read += 1;
        match parse_row(row, &layout, model, config) {
            Ok(record) => records.push(record),
            Err(reason) => counts.record_drop(reason),
        }
    }

    let predictions = group_records(records, config, &mut counts);
    counts.rows_kept = counts.rows_read - counts.dropped();

    if counts.dropped_mixed_type > 0 {
        warn!(
            path = %path.display(),
            rows = counts.dropped_mixed_type,
            "dropped rows whose output type disagreed with their group"
        );
    }
    debug!(
        path = %path.display(),
        model,
        rows = counts.rows_read,
        kept = counts.rows_kept,
        predictions = predictions.len(),
        "normalized file"
    );

    Ok(NormalizedFile {
        model: model.to_string(),
        path: path.to_path_buf(),
        predictions,
        counts,
    })
}

fn parse_row(
    row: Row<'_>,
    layout: &ColumnLayout,
    model: &str,
    config: &HubConfig,
) -> Result<ForecastRecord, RowDrop> {
    let tag = row.get(layout.output_type).ok_or(RowDrop::MissingField)?;
    if is_sample_tag(tag) && !config.keep_samples {
        return Err(RowDrop::Sample);
    }
    let kind = OutputKind::parse(tag).ok_or(RowDrop::UnsupportedType)?;

    let location = row.get(layout.location).ok_or(RowDrop::MissingField)?;
    let target = row.get(layout.target).ok_or(RowDrop::MissingField)?;

    let reference_date = row
        .get(layout.reference_date)
        .and_then(parse_calendar_date)
        .ok_or(RowDrop::BadDate)?;

    let age_group = match layout.age_group {
        Some(idx) => {
            let age_group = row.get(idx).ok_or(RowDrop::MissingField)?;
            if !config.accepts_age_group(age_group) {
                return Err(RowDrop::AgeGroup);
            }
            Some(age_group.to_string())
        }
        None => None,
    };

    let horizon = row
        .get(layout.horizon)
        .and_then(parse_horizon)
        .ok_or(RowDrop::BadHorizon)?;

    let output_type_id = match kind {
        OutputKind::Quantile => {
            let level = parse_number(row.get(layout.output_type_id))
                .filter(|level| (0.0..=1.0).contains(level))
                .ok_or(RowDrop::BadTypeId)?;
            if !config.retains_quantile(level) {
                return Err(RowDrop::QuantileLevel);
            }
            OutputTypeId::Level(level)
        }
        OutputKind::Pmf => OutputTypeId::Label(
            row.get(layout.output_type_id)
                .ok_or(RowDrop::BadTypeId)?
                .to_string(),
        ),
        OutputKind::Sample => {
            OutputTypeId::Label(row.get(layout.output_type_id).unwrap_or_default().to_string())
        }
    };

    let value = parse_number(row.get(layout.value)).ok_or(RowDrop::BadValue)?;

    let target_end_date = match row.get_opt(layout.target_end_date) {
        Some(raw) => parse_calendar_date(raw).ok_or(RowDrop::BadDate)?,
        None => derive_target_end_date(reference_date, horizon, config.horizon_period_days)
            .ok_or(RowDrop::BadDate)?,
    };

    Ok(ForecastRecord {
        location: location.to_string(),
        reference_date,
        target: target.to_string(),
        age_group,
        horizon,
        kind,
        output_type_id,
        value,
        target_end_date,
        model: model.to_string(),
    })
}

/// Integral horizons only; dataframe writers sometimes emit `1.0`.
fn parse_horizon(raw: &str) -> Option<i32> {
    let trimmed = raw.trim();
    if let Ok(horizon) = trimmed.parse::<i32>() {
        return Some(horizon);
    }
    let value = trimmed.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= f64::from(i32::MAX) {
        Some(value as i32)
    } else {
        None
    }
}

fn derive_target_end_date(
    reference: NaiveDate,
    horizon: i32,
    period_days: i64,
) -> Option<NaiveDate> {
    reference.checked_add_signed(Duration::days(i64::from(horizon) * period_days))
}

fn group_records(
    records: Vec<ForecastRecord>,
    config: &HubConfig,
    counts: &mut RowCounts,
) -> Vec<(PredictionKey, Prediction)> {
    let mut groups: BTreeMap<PredictionKey, Vec<ForecastRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.key()).or_default().push(record);
    }

    groups
        .into_iter()
        .map(|(key, rows)| {
            let prediction = build_prediction(&key, rows, config, counts);
            (key, prediction)
        })
        .collect()
}

fn build_prediction(
    key: &PredictionKey,
    rows: Vec<ForecastRecord>,
    config: &HubConfig,
    counts: &mut RowCounts,
) -> Prediction {
    let kind = rows[0].kind;
    let target_end_date = rows[0].target_end_date;
    let before = rows.len();
    let rows: Vec<ForecastRecord> = rows.into_iter().filter(|row| row.kind == kind).collect();
    if rows.len() < before {
        counts.dropped_mixed_type += before - rows.len();
        debug!(
            location = %key.location,
            target = %key.target,
            horizon = key.horizon,
            kind = kind.as_str(),
            "kept the first output type of a mixed group"
        );
    }

    let distribution = match kind {
        OutputKind::Quantile => build_quantiles(key, rows),
        OutputKind::Pmf => build_pmf(rows, config.pmf_category_order.get(&key.target)),
        OutputKind::Sample => Distribution::Sample {
            draws: rows.iter().map(|row| row.value).collect(),
        },
    };

    Prediction {
        target_end_date,
        distribution,
    }
}

fn build_quantiles(key: &PredictionKey, rows: Vec<ForecastRecord>) -> Distribution {
    let mut pairs: Vec<(f64, f64)> = rows
        .iter()
        .filter_map(|row| match row.output_type_id {
            OutputTypeId::Level(level) => Some((level, row.value)),
            OutputTypeId::Label(_) => None,
        })
        .collect();
    // Stable sort keeps file order among equal levels, so the later row wins.
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut levels: Vec<f64> = Vec::with_capacity(pairs.len());
    let mut values: Vec<f64> = Vec::with_capacity(pairs.len());
    for (level, value) in pairs {
        if levels.last() == Some(&level) {
            if let Some(last) = values.last_mut() {
                *last = value;
            }
            continue;
        }
        levels.push(level);
        values.push(value);
    }

    if values.windows(2).any(|pair| pair[1] < pair[0]) {
        debug!(
            location = %key.location,
            target = %key.target,
            model = %key.model,
            horizon = key.horizon,
            "quantile values are not monotone"
        );
    }

    Distribution::Quantile { levels, values }
}

fn build_pmf(rows: Vec<ForecastRecord>, order: Option<&Vec<String>>) -> Distribution {
    let mut entries: Vec<(String, f64)> = Vec::with_capacity(rows.len());
    for row in rows {
        let OutputTypeId::Label(category) = row.output_type_id else {
            continue;
        };
        match entries.iter_mut().find(|(existing, _)| *existing == category) {
            Some(entry) => entry.1 = row.value,
            None => entries.push((category, row.value)),
        }
    }

    if let Some(order) = order {
        entries.sort_by_key(|(category, _)| {
            order
                .iter()
                .position(|known| known == category)
                .unwrap_or(order.len())
        });
    }

    let (categories, probabilities) = entries.into_iter().unzip();
    Distribution::Pmf {
        categories,
        probabilities,
    }
}
