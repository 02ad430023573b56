use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::normalize::NormalizedFile;
use crate::prediction::{Prediction, PredictionKey};

pub type HorizonMap = BTreeMap<i32, Leaf>;
pub type ModelMap = BTreeMap<String, HorizonMap>;
/// `None` for families without an age-group dimension.
pub type AgeGroupMap = BTreeMap<Option<String>, ModelMap>;
pub type TargetMap = BTreeMap<String, AgeGroupMap>;
pub type DateMap = BTreeMap<NaiveDate, TargetMap>;

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    prediction: Prediction,
    rank: usize,
}

impl Leaf {
    pub fn prediction(&self) -> &Prediction {
        &self.prediction
    }
}

/// location -> reference date -> target -> age group -> model -> horizon.
///
/// Build-once, read-many. Keys are assumed valid; nothing here fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationIndex {
    locations: BTreeMap<String, DateMap>,
    len: usize,
}

impl AggregationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional overwrite of the leaf at `key`.
    pub fn insert(&mut self, key: PredictionKey, prediction: Prediction) {
        self.store(key, prediction, 0, true);
    }

    /// Merge one file's predictions. `rank` is the file's position in
    /// discovery order; a leaf already holding a higher rank is kept, so
    /// the final state does not depend on the order merges arrive in.
    pub fn merge(&mut self, file: NormalizedFile, rank: usize) -> usize {
        let mut applied = 0;
        for (key, prediction) in file.predictions {
            if self.store(key, prediction, rank, false) {
                applied += 1;
            }
        }
        applied
    }

    fn store(
        &mut self,
        key: PredictionKey,
        prediction: Prediction,
        rank: usize,
        force: bool,
    ) -> bool {
        let horizons = self
            .locations
            .entry(key.location)
            .or_default()
            .entry(key.reference_date)
            .or_default()
            .entry(key.target)
            .or_default()
            .entry(key.age_group)
            .or_default()
            .entry(key.model)
            .or_default();

        match horizons.entry(key.horizon) {
            Entry::Occupied(mut slot) => {
                if !force && slot.get().rank > rank {
                    return false;
                }
                slot.insert(Leaf { prediction, rank });
            }
            Entry::Vacant(slot) => {
                slot.insert(Leaf { prediction, rank });
                self.len += 1;
            }
        }
        true
    }

    pub fn lookup(&self, key: &PredictionKey) -> Option<&Prediction> {
        self.locations
            .get(&key.location)?
            .get(&key.reference_date)?
            .get(&key.target)?
            .get(&key.age_group)?
            .get(&key.model)?
            .get(&key.horizon)
            .map(Leaf::prediction)
    }

    pub fn location(&self, location: &str) -> Option<&DateMap> {
        self.locations.get(location)
    }

    pub fn location_codes(&self) -> impl Iterator<Item = &str> {
        self.locations.keys().map(String::as_str)
    }

    pub fn models(&self) -> BTreeSet<String> {
        self.locations.values().flat_map(models_in).collect()
    }

    pub fn models_for(&self, location: &str) -> BTreeSet<String> {
        self.locations
            .get(location)
            .map(|dates| models_in(dates).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn models_in(dates: &DateMap) -> impl Iterator<Item = String> + '_ {
    dates
        .values()
        .flat_map(|targets| targets.values())
        .flat_map(|age_groups| age_groups.values())
        .flat_map(|models| models.keys().cloned())
}
