//! Path and query parameters.
//!
//! Both are small ordered lists of `(name, value)` strings. A route rarely
//! captures more than a few segments, so the pairs live inline.

use serde_json::{Map, Value};
use smallvec::SmallVec;

type Pairs = SmallVec<[(String, String); 4]>;

/// Named string values captured from `[name]` segments or decoded from a
/// query string, in the order they were seen.
///
/// ```rust
/// use zephyr_router::Params;
///
/// let mut params = Params::new();
/// params.push("orgId", "acme");
/// params.push("id", "42");
///
/// assert_eq!(params.get("orgId"), Some("acme"));
/// assert_eq!(params.get("missing"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Pairs,
}

impl Params {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes an `application/x-www-form-urlencoded` query string.
    ///
    /// A leading `?` is ignored and a repeated key keeps its last value.
    ///
    /// ```rust
    /// use zephyr_router::Params;
    ///
    /// let query = Params::from_query("?color=red&size=l&color=blue");
    /// assert_eq!(query.get("color"), Some("blue"));
    /// assert_eq!(query.len(), 2);
    /// ```
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let raw = query.strip_prefix('?').unwrap_or(query);
        let mut query = Self::new();
        for (name, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            query.insert(name, value);
        }
        query
    }

    /// Appends a pair without checking for an existing name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Appends a pair, or overwrites the value if `name` is already present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        if let Some(existing) = self.pairs.iter_mut().find(|(key, _)| *key == name) {
            existing.1 = value;
        } else {
            self.pairs.push((name, value));
        }
    }

    /// The first value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value.as_str()))
    }

    /// `true` when nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of stored pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.pairs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// A JSON object with every value as a string; this is what schema
    /// validators receive.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(key, value)| (key.to_owned(), Value::String(value.to_owned())))
                .collect::<Map<_, _>>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_order() {
        let mut params = Params::new();
        params.push("orgId", "acme");
        params.push("id", "7");

        let seen: Vec<_> = params.iter().collect();
        assert_eq!(seen, vec![("orgId", "acme"), ("id", "7")]);
        assert_eq!(params.get("nope"), None);
    }

    #[test]
    fn test_insert_overwrites() {
        let mut query = Params::new();
        query.insert("page", "1");
        query.insert("page", "2");

        assert_eq!(query.len(), 1);
        assert_eq!(query.get("page"), Some("2"));
    }

    #[test]
    fn test_from_query_percent_decodes() {
        let query = Params::from_query("q=hello+world&tag=%23rust&empty=");

        assert_eq!(query.get("q"), Some("hello world"));
        assert_eq!(query.get("tag"), Some("#rust"));
        assert_eq!(query.get("empty"), Some(""));
    }

    #[test]
    fn test_from_query_blank() {
        assert!(Params::from_query("").is_empty());
        assert!(Params::from_query("?").is_empty());
    }

    #[test]
    fn test_to_json_values_are_strings() {
        let query = Params::from_query("a=1&b=two");
        assert_eq!(query.to_json(), serde_json::json!({"a": "1", "b": "two"}));
    }

    #[test]
    fn test_spills_past_inline_capacity() {
        let segments: Params = {
            let mut p = Params::new();
            for n in 0..9 {
                p.push(format!("s{n}"), n.to_string());
            }
            p
        };

        assert_eq!(segments.len(), 9);
        assert_eq!(segments.get("s8"), Some("8"));
    }
}
