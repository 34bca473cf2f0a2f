//! Ordered, multi-valued header container.
//!
//! # Design Decisions
//! - Pairs are kept in insertion order; adding never deduplicates
//! - Name comparison is ASCII case-insensitive, original casing is kept
//! - Removing a name removes every value stored under it

use std::fmt;

/// Ordered sequence of `(name, value)` pairs with case-insensitive lookup.
///
/// Used for request/response headers, trailers, query parameters and
/// form attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every value stored under `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        match self.position(&name) {
            Some(first) => {
                // keep the slot of the first occurrence so ordering is stable
                self.entries[first].1 = value.into();
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= first || !n.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value.into())),
        }
        self
    }

    /// Append a value without touching existing ones.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// All values stored under `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of pairs, not of unique names.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Unique names, keeping the casing of the first occurrence.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.entries {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Whether any value of `name` contains `token` as a comma separated
    /// element (e.g. `Connection: keep-alive, Upgrade`).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).iter().any(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut set = HeaderSet::new();
        for (name, value) in iter {
            set.add(name, value);
        }
        set
    }
}

impl<N: Into<String>, V: Into<String>> Extend<(N, V)> for HeaderSet {
    fn extend<I: IntoIterator<Item = (N, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.add(name, value);
        }
    }
}

impl<'a> IntoIterator for &'a HeaderSet {
    type Item = (&'a str, &'a str);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, String)>,
        fn(&'a (String, String)) -> (&'a str, &'a str),
    >;

    fn into_iter(self) -> Self::IntoIter {
        fn as_pair(entry: &(String, String)) -> (&str, &str) {
            (entry.0.as_str(), entry.1.as_str())
        }
        self.entries.iter().map(as_pair as fn(&'a (String, String)) -> (&'a str, &'a str))
    }
}

impl fmt::Display for HeaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_ignores_case() {
        let mut headers = HeaderSet::new();
        headers.set("Content-Type", "text/html");
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
    }

    #[test]
    fn set_replaces_all_values() {
        let mut headers = HeaderSet::new();
        headers.add("a", "1").add("b", "x").add("A", "2");
        headers.set("a", "3");
        assert_eq!(headers.get_all("a"), vec!["3"]);
        assert_eq!(headers.size(), 2);
        assert_eq!(headers.names(), vec!["a", "b"]);
    }

    #[test]
    fn add_preserves_insertion_order() {
        let mut headers = HeaderSet::new();
        headers.add("header3", "vheader3_1").add("Header3", "vheader3");
        assert_eq!(headers.get_all("HEADER3"), vec!["vheader3_1", "vheader3"]);
        assert_eq!(headers.get("header3"), Some("vheader3_1"));
    }

    #[test]
    fn remove_drops_every_value() {
        let mut headers = HeaderSet::new();
        headers.add("x", "1").add("X", "2").add("y", "3");
        headers.remove("x");
        assert!(!headers.contains("x"));
        assert_eq!(headers.size(), 1);
    }

    #[test]
    fn absent_names_are_noops() {
        let mut headers = HeaderSet::new();
        headers.remove("missing");
        assert_eq!(headers.get("missing"), None);
        assert!(headers.get_all("missing").is_empty());
        assert!(headers.is_empty());
    }

    #[test]
    fn names_are_unique_and_iteration_yields_every_pair() {
        let headers: HeaderSet = [("h1", "a"), ("h2", "b"), ("H1", "c")].into_iter().collect();
        assert_eq!(headers.names(), vec!["h1", "h2"]);

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("h1", "a"), ("h2", "b"), ("H1", "c")]);
        for (name, value) in &headers {
            assert!(headers.get_all(name).contains(&value));
        }
    }

    #[test]
    fn token_lookup_splits_on_commas() {
        let mut headers = HeaderSet::new();
        headers.set("Connection", "keep-alive, Close");
        assert!(headers.has_token("connection", "close"));
        assert!(!headers.has_token("connection", "upgrade"));
    }
}
