//! Connection descriptor parsing.
//!
//! A descriptor is a flat `key=value;key=value` string selecting and
//! parameterizing a backend, e.g.
//! `type=cloud;serviceType=openai;endpoint=https://x;apiVersion=v1;deployment=d`.

use crate::error::LmError;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Key every descriptor must carry.
pub const TYPE_KEY: &str = "type";

/// Parsed, immutable connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    values: BTreeMap<String, String>,
}

impl ConnectionDescriptor {
    /// Parse a descriptor string.
    ///
    /// Keys and values are trimmed; the last occurrence of a duplicate key
    /// wins. Blank segments (such as the one after a trailing `;`) are
    /// skipped. A segment without `=`, or with an empty key or value, rejects
    /// the whole descriptor, as does a missing `type` key.
    pub fn parse(input: &str) -> Result<Self, LmError> {
        let mut values = BTreeMap::new();

        for segment in input.split(';') {
            if segment.trim().is_empty() {
                continue;
            }

            let (key, value) = segment.split_once('=').ok_or_else(|| {
                LmError::descriptor(format!("segment '{}' is not a key=value pair", segment.trim()))
            })?;

            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return Err(LmError::descriptor(format!(
                    "segment '{}' has an empty key or value",
                    segment.trim()
                )));
            }

            values.insert(key.to_string(), value.to_string());
        }

        if !values.contains_key(TYPE_KEY) {
            return Err(LmError::descriptor("missing 'type' key"));
        }

        Ok(Self { values })
    }

    /// The backend discriminator
    pub fn kind(&self) -> &str {
        self.values
            .get(TYPE_KEY)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Keys from `required` that this descriptor does not carry, in order.
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|key| !self.values.contains_key(*key))
            .collect()
    }

    /// Number of key/value pairs
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = LmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
