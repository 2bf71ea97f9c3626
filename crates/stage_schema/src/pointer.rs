//! JSON-Pointer-style paths into component values.
//!
//! Paths are rooted at the component's value. The root itself renders as
//! `/` (not the empty string RFC 6901 uses), so `/`, `/a`, `/0` and `/a/b`
//! are all valid spellings. Segments are escaped the RFC 6901 way
//! (`~0` for `~`, `~1` for `/`).

use std::fmt;

use serde_json::Value;

/// A path from a component's root value to one node inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pointer(Vec<String>);

impl Pointer {
    /// The root path `/`.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a pointer. `""` and `"/"` both mean the root.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        if trimmed.is_empty() {
            return Self::root();
        }
        Self(
            trimmed
                .split('/')
                .map(|s| s.replace("~1", "/").replace("~0", "~"))
                .collect(),
        )
    }

    /// Returns `true` for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns the last segment, or `None` for the root.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Returns a new pointer one segment deeper.
    #[must_use]
    pub fn join(&self, segment: impl fmt::Display) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    /// Returns a new pointer with all of `other`'s segments appended.
    #[must_use]
    pub fn concat(&self, other: &Pointer) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// Split into the parent path and the last segment.
    #[must_use]
    pub fn split_last(&self) -> Option<(Pointer, &str)> {
        let (last, parent) = self.0.split_last()?;
        Some((Self(parent.to_vec()), last.as_str()))
    }

    /// Returns `true` if `self` equals `prefix` or lies underneath it.
    #[must_use]
    pub fn starts_with(&self, prefix: &Pointer) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Look up the node this pointer addresses inside `value`.
    #[must_use]
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(value, |node, segment| step(node, segment))
    }

    /// Mutable variant of [`get`](Self::get).
    #[must_use]
    pub fn get_mut<'a>(&self, value: &'a mut Value) -> Option<&'a mut Value> {
        self.0.iter().try_fold(value, |node, segment| match node {
            Value::Object(map) => map.get_mut(segment.as_str()),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        })
    }
}

fn step<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Parse an array index segment. Leading `+`, signs and empty strings are
/// not indices.
#[must_use]
pub fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{}", segment.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}

impl From<&str> for Pointer {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_root_spellings() {
        assert!(Pointer::parse("").is_root());
        assert!(Pointer::parse("/").is_root());
        assert_eq!(Pointer::root().to_string(), "/");
    }

    #[test]
    fn test_display_round_trips_escapes() {
        let pointer = Pointer::root().join("a/b").join("c~d").join(0);
        assert_eq!(pointer.to_string(), "/a~1b/c~0d/0");
        assert_eq!(Pointer::parse(&pointer.to_string()), pointer);
    }

    #[test]
    fn test_get_walks_objects_and_arrays() {
        let value = json!({"a": {"b": [10, 20]}});
        assert_eq!(Pointer::parse("/a/b/1").get(&value), Some(&json!(20)));
        assert_eq!(Pointer::parse("/a/x").get(&value), None);
        assert_eq!(Pointer::root().get(&value), Some(&value));
    }

    #[test]
    fn test_split_last() {
        let binding = Pointer::parse("/a/b");
        let (parent, last) = binding.split_last().unwrap();
        assert_eq!(parent, Pointer::parse("/a"));
        assert_eq!(last, "b");
        assert!(Pointer::root().split_last().is_none());
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("12"), Some(12));
        assert_eq!(parse_index("+1"), None);
        assert_eq!(parse_index("length"), None);
        assert_eq!(parse_index(""), None);
    }
}
