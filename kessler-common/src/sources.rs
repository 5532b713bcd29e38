//! Source registry: known providers and their resolution precedence

use serde::{Deserialize, Serialize};

/// UN Office for Outer Space Affairs registry
pub const UNOOSA: &str = "unoosa";
/// CelesTrak TLE catalog
pub const CELESTRAK: &str = "celestrak";
/// Space-Track NORAD catalog
pub const SPACETRACK: &str = "spacetrack";
/// Merged Kaggle dataset
pub const KAGGLE: &str = "kaggle";

/// Ordered list of source names, most authoritative first
///
/// Immutable once built. Passed explicitly to everything that needs it so
/// alternate orders can coexist (tests, per-deployment config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SourceRegistry {
    priority: Vec<String>,
}

impl SourceRegistry {
    /// Build a registry; duplicate names keep their first position
    pub fn new<I, S>(priority: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for name in priority {
            let name = name.into();
            if !ordered.contains(&name) {
                ordered.push(name);
            }
        }
        Self { priority: ordered }
    }

    /// Rank of a source (0 = highest priority), `None` if unknown
    pub fn priority_rank(&self, source_name: &str) -> Option<usize> {
        self.priority.iter().position(|s| s == source_name)
    }

    /// All known sources, highest priority first
    pub fn all_sources(&self) -> &[String] {
        &self.priority
    }

    pub fn contains(&self, source_name: &str) -> bool {
        self.priority_rank(source_name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty()
    }

    /// Order arbitrary source names for resolution
    ///
    /// Known sources by rank, then unknown sources alphabetically.
    /// Duplicates are removed.
    pub fn order_sources<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut names: Vec<&str> = names.into_iter().collect();
        names.sort_by(|a, b| {
            let rank_a = self.priority_rank(a).unwrap_or(usize::MAX);
            let rank_b = self.priority_rank(b).unwrap_or(usize::MAX);
            rank_a.cmp(&rank_b).then_with(|| a.cmp(b))
        });
        names.dedup();
        names.into_iter().map(str::to_string).collect()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new([UNOOSA, CELESTRAK, SPACETRACK, KAGGLE])
    }
}

impl From<Vec<String>> for SourceRegistry {
    fn from(priority: Vec<String>) -> Self {
        Self::new(priority)
    }
}

impl From<SourceRegistry> for Vec<String> {
    fn from(registry: SourceRegistry) -> Self {
        registry.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority_order() {
        let registry = SourceRegistry::default();
        assert_eq!(registry.all_sources(), &["unoosa", "celestrak", "spacetrack", "kaggle"]);
        assert_eq!(registry.priority_rank("unoosa"), Some(0));
        assert_eq!(registry.priority_rank("kaggle"), Some(3));
        assert_eq!(registry.priority_rank("esa"), None);
    }

    #[test]
    fn test_duplicates_keep_first_position() {
        let registry = SourceRegistry::new(["b", "a", "b"]);
        assert_eq!(registry.all_sources(), &["b", "a"]);
    }

    #[test]
    fn test_order_sources_puts_unknown_last() {
        let registry = SourceRegistry::new(["a", "b"]);
        let ordered = registry.order_sources(["zeta", "b", "alpha", "a", "b"]);
        assert_eq!(ordered, vec!["a", "b", "alpha", "zeta"]);
    }
}
