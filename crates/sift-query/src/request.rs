use serde_json::Value;

use crate::error::QueryError;

/// The flat, string-keyed request as it arrives from a query string.
///
/// Keys keep their insertion order; inserting an existing key replaces its
/// value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    params: Vec<(String, String)>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a flat JSON object. Numbers and booleans are stringified;
    /// nulls are dropped.
    pub fn from_json(value: &Value) -> Result<Self, QueryError> {
        let map = value
            .as_object()
            .ok_or_else(|| QueryError::InvalidRequest("request must be a JSON object".into()))?;

        let mut request = Request::new();
        for (key, value) in map {
            let value = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(QueryError::InvalidRequest(format!(
                        "value of {key:?} must be a scalar"
                    )));
                }
            };
            request.insert(key.clone(), value);
        }
        Ok(request)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.params.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Request {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut request = Request::new();
        for (key, value) in iter {
            request.insert(key, value);
        }
        request
    }
}
