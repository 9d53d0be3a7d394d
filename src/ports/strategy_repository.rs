//! Strategy lookup port.

use crate::domain::error::FundlabError;
use crate::domain::strategy::StrategySpec;

/// Source of validated strategies by id.
pub trait StrategyRepository {
    /// Unknown ids yield [`FundlabError::UnknownStrategy`].
    fn get(&self, id: &str) -> Result<StrategySpec, FundlabError>;

    /// Known ids, sorted.
    fn list(&self) -> Vec<String>;
}
