//! Ordered multi-value maps for headers and query parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Mapping of name to an ordered list of values.
///
/// Names are kept verbatim; use [`Headers`] for case-insensitive lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, Vec<String>>);

impl QueryParams {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an `application/x-www-form-urlencoded` query string.
    pub fn parse(query: &str) -> Self {
        let mut params = Self::new();
        for (name, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        {
            params.append(name.into_owned(), value.into_owned());
        }
        params
    }

    /// Appends a value under `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    /// Returns the first value for `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// Returns all values for `name`.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Single-value view keeping the first value per name.
    pub fn to_single(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.first().map(|first| (k.clone(), first.clone())))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.append(k, v);
        }
        params
    }
}

impl From<BTreeMap<String, Vec<String>>> for QueryParams {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self(map)
    }
}

/// Case-insensitive header map.
///
/// Names are lowercased on insertion so that `Content-Type` and
/// `content-type` address the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value, keeping any existing values for the name.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .entry(name.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replaces every value for the name with `value`.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), vec![value.into()]);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns the first value for `name`, ignoring case.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Single-value view keeping the first value per name.
    pub fn to_single(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.first().map(|first| (k.clone(), first.clone())))
            .collect()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

impl From<BTreeMap<String, Vec<String>>> for Headers {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        let mut headers = Self::new();
        for (name, values) in map {
            for value in values {
                headers.append(&name, value);
            }
        }
        headers
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, Vec<String>>::deserialize(deserializer).map(Self::from)
    }
}
