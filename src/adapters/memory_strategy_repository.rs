//! In-memory strategy repository seeded with the built-in presets.

use std::collections::BTreeMap;

use crate::domain::error::FundlabError;
use crate::domain::strategy::{StrategyPreset, StrategySpec};
use crate::ports::strategy_repository::StrategyRepository;

pub struct MemoryStrategyRepository {
    strategies: BTreeMap<String, StrategySpec>,
}

impl MemoryStrategyRepository {
    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    pub fn with_presets() -> Self {
        let strategies = StrategyPreset::ALL
            .into_iter()
            .map(|p| (p.id().to_string(), p.spec()))
            .collect();
        Self { strategies }
    }

    /// Store a strategy under its name, replacing any previous entry.
    pub fn insert(&mut self, spec: StrategySpec) -> Result<(), FundlabError> {
        spec.validate()?;
        self.strategies.insert(spec.name.clone(), spec);
        Ok(())
    }
}

impl StrategyRepository for MemoryStrategyRepository {
    fn get(&self, id: &str) -> Result<StrategySpec, FundlabError> {
        self.strategies
            .get(id.trim())
            .cloned()
            .ok_or_else(|| FundlabError::UnknownStrategy(id.trim().to_string()))
    }

    fn list(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }
}
