/// Data source configuration
///
/// `DataConfig` is the data-level part of a grid definition. It is usually
/// built in code, but can also be parsed from the JSON the grid front-end
/// sends (`{"groupByRules": ["region", "city"]}`).

use crate::error::{DataSourceError, Result};
use crate::group::GroupBy;
use serde::{Deserialize, Serialize};

/// How the layout engine arranges rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowHierarchy {
    /// Flat rows (default).
    #[default]
    Grid,
    /// Nested rows with expandable group headers.
    Tree,
}

/// When a cached field value short-circuits a field read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCachePolicy {
    /// Only truthy cached values are hits (default).
    ///
    /// A settled `0`, `""`, `false`, `null` or undefined re-delegates to the
    /// base resolver on every read. This matches the behavior grids built on
    /// this data source already rely on.
    #[default]
    Truthy,

    /// Any settled value is a hit, including falsy and undefined ones.
    Presence,
}

impl FieldCachePolicy {
    /// Parse a policy name.
    ///
    /// Accepts: "truthy", "presence"
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "truthy" => Ok(FieldCachePolicy::Truthy),
            "presence" | "present" => Ok(FieldCachePolicy::Presence),
            _ => Err(DataSourceError::Config(format!(
                "Unknown field cache policy: '{}'. Use 'truthy' or 'presence'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataConfig {
    /// Ordered grouping keys. Presence of the list forces tree rows.
    pub group_by_rules: Option<Vec<String>>,

    /// Initial expand depth handed through to the layout engine.
    pub hierarchy_expand_level: Option<usize>,

    pub field_cache_policy: FieldCachePolicy,
}

impl DataConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config grouping by the given keys, outermost first.
    pub fn grouped_by<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DataConfig {
            group_by_rules: Some(keys.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_field_cache_policy(mut self, policy: FieldCachePolicy) -> Self {
        self.field_cache_policy = policy;
        self
    }

    pub fn with_hierarchy_expand_level(mut self, level: usize) -> Self {
        self.hierarchy_expand_level = Some(level);
        self
    }

    /// Parse a config from JSON.
    ///
    /// # Example
    ///
    /// ```
    /// use livegrid::{DataConfig, FieldCachePolicy};
    ///
    /// let config = DataConfig::from_json(
    ///     r#"{"groupByRules": ["region", "city"], "fieldCachePolicy": "presence"}"#,
    /// ).unwrap();
    /// assert_eq!(config.group_length(), 2);
    /// assert_eq!(config.field_cache_policy, FieldCachePolicy::Presence);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Grouping keys, if grouping is configured at all.
    pub fn group_by(&self) -> Option<GroupBy> {
        self.group_by_rules.as_ref().map(|keys| GroupBy::new(keys.clone()))
    }

    /// Number of configured grouping levels, 0 without grouping.
    pub fn group_length(&self) -> usize {
        self.group_by_rules.as_ref().map_or(0, Vec::len)
    }

    /// Row hierarchy after applying the config: grouping always means tree rows.
    pub fn effective_hierarchy(&self, requested: RowHierarchy) -> RowHierarchy {
        if self.group_by_rules.is_some() {
            RowHierarchy::Tree
        } else {
            requested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!(FieldCachePolicy::from_str("truthy").unwrap(), FieldCachePolicy::Truthy);
        assert_eq!(FieldCachePolicy::from_str("Presence").unwrap(), FieldCachePolicy::Presence);
        let err = FieldCachePolicy::from_str("lru").unwrap_err();
        assert!(err.to_string().contains("Unknown field cache policy"));
    }

    #[test]
    fn test_group_by_forces_tree() {
        let flat = DataConfig::new();
        assert_eq!(flat.effective_hierarchy(RowHierarchy::Grid), RowHierarchy::Grid);
        assert_eq!(flat.group_length(), 0);
        assert!(flat.group_by().is_none());

        let grouped = DataConfig::grouped_by(["a", "b"]);
        assert_eq!(grouped.effective_hierarchy(RowHierarchy::Grid), RowHierarchy::Tree);
        assert_eq!(grouped.group_length(), 2);

        // An empty rule list still switches to tree rows
        let empty = DataConfig::grouped_by(Vec::<String>::new());
        assert_eq!(empty.effective_hierarchy(RowHierarchy::Grid), RowHierarchy::Tree);
        assert_eq!(empty.group_length(), 0);
    }

    #[test]
    fn test_from_json_defaults() {
        let config = DataConfig::from_json("{}").unwrap();
        assert_eq!(config, DataConfig::default());

        let config = DataConfig::from_json(r#"{"hierarchyExpandLevel": 2}"#).unwrap();
        assert_eq!(config.hierarchy_expand_level, Some(2));

        assert!(DataConfig::from_json(r#"{"groupByRules": "region"}"#).is_err());
    }
}
