pub mod inventory;
pub mod process;
pub mod status;
pub mod truth;

use anyhow::Result;

use crate::config::{HubConfig, HubPaths};
use crate::locations::LocationRegistry;
use crate::truth::GroundTruth;

/// Reference data loaded once per run and shared read-only with every
/// consumer after construction.
#[derive(Debug)]
pub struct Session {
    pub config: HubConfig,
    pub registry: LocationRegistry,
    pub truth: GroundTruth,
}

impl Session {
    pub fn open(config: HubConfig, paths: &HubPaths) -> Result<Self> {
        let registry = LocationRegistry::load(&paths.locations, &config.registry)?;
        let truth = GroundTruth::load(&paths.target_data, &config, &registry)?;
        Ok(Self {
            config,
            registry,
            truth,
        })
    }
}
