use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::RegistryColumns;
use crate::model::LocationMetadata;
use crate::table::RawTable;
use crate::util::parse_number;

#[derive(Debug, Clone, Default)]
pub struct LocationRegistry {
    entries: Vec<LocationMetadata>,
    by_code: HashMap<String, usize>,
    by_abbreviation: HashMap<String, usize>,
}

impl LocationRegistry {
    pub fn load(path: &Path, columns: &RegistryColumns) -> Result<Self> {
        info!(path = %path.display(), "loading location registry");
        let table = RawTable::read(path)
            .with_context(|| format!("failed to load location registry {}", path.display()))?;

        let code_idx = table
            .column_index(&columns.location)
            .with_context(|| {
                format!(
                    "location registry {} has no '{}' column",
                    path.display(),
                    columns.location
                )
            })?;
        let abbreviation_idx = table.column_index(&columns.abbreviation);
        let name_idx = table.column_index(&columns.location_name);
        let population_idx = table.column_index(&columns.population);

        let mut entries = Vec::with_capacity(table.len());
        let mut skipped = 0_usize;
        for row in table.rows() {
            let Some(code) = row.get(code_idx) else {
                skipped += 1;
                continue;
            };
            let population = parse_number(row.get_opt(population_idx))
                .filter(|population| population.is_finite())
                .map(|population| population.max(0.0))
                .unwrap_or(0.0);

            entries.push(LocationMetadata {
                location: code.to_string(),
                abbreviation: row.get_opt(abbreviation_idx).unwrap_or(code).to_string(),
                location_name: row.get_opt(name_idx).unwrap_or(code).to_string(),
                population,
            });
        }

        if skipped > 0 {
            warn!(
                path = %path.display(),
                rows = skipped,
                "skipped registry rows without a location code"
            );
        }
        info!(locations = entries.len(), "loaded location registry");

        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<LocationMetadata>) -> Self {
        let mut by_code = HashMap::with_capacity(entries.len());
        let mut by_abbreviation = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            by_code.entry(entry.location.clone()).or_insert(idx);
            by_abbreviation
                .entry(entry.abbreviation.to_ascii_uppercase())
                .or_insert(idx);
        }

        Self {
            entries,
            by_code,
            by_abbreviation,
        }
    }

    pub fn entries(&self) -> &[LocationMetadata] {
        &self.entries
    }

    pub fn get(&self, code: &str) -> Option<&LocationMetadata> {
        self.by_code.get(code).map(|idx| &self.entries[*idx])
    }

    /// Exact code match first, then case-insensitive abbreviation.
    pub fn find(&self, raw: &str) -> Option<&LocationMetadata> {
        let raw = raw.trim();
        self.get(raw).or_else(|| {
            self.by_abbreviation
                .get(&raw.to_ascii_uppercase())
                .map(|idx| &self.entries[*idx])
        })
    }
}
