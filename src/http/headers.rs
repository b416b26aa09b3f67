//! HTTP header fields
//!
//! HTTP/2 carries field names in lowercase, so this collection normalizes
//! names on insertion and keeps every value in arrival order. Lookups are
//! still case-insensitive so callers can use the familiar spelling.

use super::{Error, Result, MAX_HEADERS};
use std::fmt;

/// HTTP header collection
///
/// Headers are stored in insertion order and support:
/// - Lowercased field names
/// - Multiple values for the same name
/// - Iteration in wire order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty header collection
    pub fn new() -> Self {
        Headers { fields: Vec::new() }
    }

    /// Append a field
    ///
    /// Repeated names accumulate rather than replace. Fields past
    /// `MAX_HEADERS` are dropped.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.fields.len() >= MAX_HEADERS {
            return;
        }
        let mut name = name.into();
        name.make_ascii_lowercase();
        self.fields.push((name, value.into()));
    }

    /// Get the first value for a field
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get every value for a field, in arrival order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Count how many times a field appears
    pub fn count(&self, name: &str) -> usize {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .count()
    }

    /// Check if a field exists
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove every instance of a field, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.fields.len()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if there are no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over all fields
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Clone the fields into an owned list, ready for a HEADERS frame
    pub fn to_field_list(&self) -> Vec<(String, String)> {
        self.fields.clone()
    }

    /// Check that a name is a legal regular HTTP/2 field name
    ///
    /// Pseudo-header names (leading `:`) are rejected here; they are only
    /// produced by the protocol layer itself.
    pub fn check_field_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidHeader("Empty header name".to_string()));
        }
        if name.starts_with(':') {
            return Err(Error::InvalidHeader(format!("Pseudo-header not allowed here: {}", name)));
        }
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(Error::InvalidHeader(format!("Uppercase header name: {}", name)));
        }
        if name.bytes().any(|b| b <= b' ' || b == 0x7f) {
            return Err(Error::InvalidHeader(format!("Invalid character in header name: {:?}", name)));
        }
        Ok(())
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lowercases_names() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");

        assert_eq!(headers.iter().next(), Some(("content-type", "text/html")));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
    }

    #[test]
    fn test_repeated_names_accumulate() {
        let mut headers = Headers::new();
        headers.insert("cookie", "a=1");
        headers.insert("cookie", "b=2");

        assert_eq!(headers.get("cookie"), Some("a=1"));
        assert_eq!(headers.get_all("cookie"), vec!["a=1", "b=2"]);
        assert_eq!(headers.count("cookie"), 2);
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.insert("x-remove", "1");
        headers.insert("x-keep", "2");
        headers.insert("x-remove", "3");

        assert_eq!(headers.remove("X-Remove"), 2);
        assert!(!headers.contains("x-remove"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_check_field_name() {
        assert!(Headers::check_field_name("content-length").is_ok());
        assert!(Headers::check_field_name("").is_err());
        assert!(Headers::check_field_name(":path").is_err());
        assert!(Headers::check_field_name("Content-Length").is_err());
        assert!(Headers::check_field_name("bad name").is_err());
    }

    #[test]
    fn test_max_headers() {
        let mut headers = Headers::new();
        for i in 0..MAX_HEADERS + 10 {
            headers.insert(format!("x-header-{}", i), "value");
        }
        assert_eq!(headers.len(), MAX_HEADERS);
    }

    #[test]
    fn test_to_field_list_keeps_order() {
        let headers: Headers = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            headers.to_field_list(),
            vec![("b".to_string(), "2".to_string()), ("a".to_string(), "1".to_string())]
        );
    }
}
