use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered environment variable set.
///
/// Re-assigning an existing name keeps its original position, so PATH-like
/// values built early stay ahead of values added later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarSet {
    entries: Vec<(String, String)>,
}

impl EnvVarSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `KEY=VALUE` assignments; entries without `=` are ignored.
    pub fn from_assignments<I, S>(assignments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for assignment in assignments {
            if let Some((key, value)) = assignment.as_ref().split_once('=') {
                if !key.is_empty() {
                    set.put(key, value);
                }
            }
        }
        set
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn put_all(&mut self, other: &EnvVarSet) {
        for (key, value) in &other.entries {
            self.put(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn to_assignments(&self) -> Vec<String> {
        self.iter().map(|(key, value)| format!("{key}={value}")).collect()
    }
}

impl fmt::Display for EnvVarSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_assignments().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_overrides_in_place() {
        let mut set = EnvVarSet::new();
        set.put("PATH", "/a");
        set.put("HOME", "/home");
        set.put("PATH", "/b");

        assert_eq!(set.to_assignments(), vec!["PATH=/b", "HOME=/home"]);
    }

    #[test]
    fn test_put_all_merges_with_override() {
        let mut base = EnvVarSet::from_assignments(["A=1", "B=2"]);
        let overrides = EnvVarSet::from_assignments(["B=3", "C=4"]);
        base.put_all(&overrides);

        assert_eq!(base.to_assignments(), vec!["A=1", "B=3", "C=4"]);
    }

    #[test]
    fn test_from_assignments_keeps_equals_in_value() {
        let set = EnvVarSet::from_assignments(["WINEDLLOVERRIDES=d3d11=n,b", "broken", "=x"]);
        assert_eq!(set.get("WINEDLLOVERRIDES"), Some("d3d11=n,b"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut set = EnvVarSet::from_assignments(["A=1", "B=2"]);
        assert_eq!(set.remove("A").as_deref(), Some("1"));
        assert!(!set.contains("A"));
        assert_eq!(set.remove("A"), None);
    }
}
