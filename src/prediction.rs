use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::PredictionView;
use crate::util::{finite_or_none, format_date};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Quantile,
    Pmf,
    Sample,
}

impl OutputKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "quantile" => Some(Self::Quantile),
            "pmf" => Some(Self::Pmf),
            "sample" | "samples" => Some(Self::Sample),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quantile => "quantile",
            Self::Pmf => "pmf",
            Self::Sample => "sample",
        }
    }
}

pub fn is_sample_tag(tag: &str) -> bool {
    tag.to_ascii_lowercase().contains("sample")
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputTypeId {
    Level(f64),
    Label(String),
}

/// One validated input row.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRecord {
    pub location: String,
    pub reference_date: NaiveDate,
    pub target: String,
    pub age_group: Option<String>,
    pub horizon: i32,
    pub kind: OutputKind,
    pub output_type_id: OutputTypeId,
    pub value: f64,
    pub target_end_date: NaiveDate,
    pub model: String,
}

impl ForecastRecord {
    pub fn key(&self) -> PredictionKey {
        PredictionKey {
            location: self.location.clone(),
            reference_date: self.reference_date,
            target: self.target.clone(),
            age_group: self.age_group.clone(),
            model: self.model.clone(),
            horizon: self.horizon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredictionKey {
    pub location: String,
    pub reference_date: NaiveDate,
    pub target: String,
    pub age_group: Option<String>,
    pub model: String,
    pub horizon: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    Quantile { levels: Vec<f64>, values: Vec<f64> },
    Pmf {
        categories: Vec<String>,
        probabilities: Vec<f64>,
    },
    Sample { draws: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub target_end_date: NaiveDate,
    pub distribution: Distribution,
}

impl Prediction {
    /// Output-boundary rendering; non-finite values become `None` here and
    /// nowhere else.
    pub fn to_view(&self) -> PredictionView {
        let date = format_date(self.target_end_date);
        match &self.distribution {
            Distribution::Quantile { levels, values } => PredictionView::Quantile {
                date,
                quantiles: levels.clone(),
                values: sanitize(values),
            },
            Distribution::Pmf {
                categories,
                probabilities,
            } => PredictionView::Pmf {
                date,
                categories: categories.clone(),
                probabilities: sanitize(probabilities),
            },
            Distribution::Sample { draws } => PredictionView::Sample {
                date,
                samples: sanitize(draws),
            },
        }
    }
}

fn sanitize(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().copied().map(finite_or_none).collect()
}
