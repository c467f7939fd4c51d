use std::collections::HashMap;

/// Candidates already tried per failing selector, for one request only.
///
/// Entries are only ever appended; nothing is removed until the registry is
/// dropped at the end of the run.
#[derive(Debug, Clone, Default)]
pub struct TriedLocatorRegistry {
    tried: HashMap<String, Vec<String>>,
}

impl TriedLocatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_tried(&self, failing: &str, candidate: &str) -> bool {
        self.tried
            .get(failing)
            .is_some_and(|list| list.iter().any(|c| c == candidate))
    }

    /// True when `selector` itself failed earlier in this run.
    pub fn has_failed(&self, selector: &str) -> bool {
        self.tried.contains_key(selector)
    }

    pub fn record(&mut self, failing: &str, candidate: &str) {
        let list = self.tried.entry(failing.to_string()).or_default();
        if !list.iter().any(|c| c == candidate) {
            list.push(candidate.to_string());
        }
    }

    pub fn tried_for(&self, failing: &str) -> &[String] {
        self.tried.get(failing).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.tried.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_ordered_and_deduplicated() {
        let mut registry = TriedLocatorRegistry::new();
        registry.record("#a", "#b");
        registry.record("#a", "#c");
        registry.record("#a", "#b");
        assert_eq!(registry.tried_for("#a"), ["#b", "#c"]);
        assert!(registry.has_tried("#a", "#c"));
        assert!(!registry.has_tried("#b", "#c"));
        assert!(registry.has_failed("#a"));
        assert_eq!(registry.len(), 2);
        assert!(registry.tried_for("#zzz").is_empty());
    }
}
