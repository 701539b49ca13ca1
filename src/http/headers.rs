use std::collections::BTreeMap;

/// Case-insensitive header map; names are stored lowercased and sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header
    pub fn insert<K: AsRef<str>, V: Into<String>>(&mut self, name: K, value: V) {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Append a value, joining repeated headers with ", "
    pub fn append<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) {
        let name = name.as_ref().to_ascii_lowercase();
        match self.0.get_mut(&name) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value.as_ref());
            }
            None => {
                self.0.insert(name, value.as_ref().to_string());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Parse a header as an unsigned integer
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Length", "42");
        assert_eq!(headers.get("content-length"), Some("42"));
        assert_eq!(headers.get("CONTENT-LENGTH"), Some("42"));
        assert_eq!(headers.get_u64("Content-Length"), Some(42));
    }

    #[test]
    fn test_append_joins_values() {
        let mut headers = Headers::new();
        headers.append("Vary", "Origin");
        headers.append("vary", "Accept");
        assert_eq!(headers.get("vary"), Some("Origin, Accept"));
    }
}
