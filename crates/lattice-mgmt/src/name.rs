//! Structured bean names: `domain:key=value,key=value,...`
//!
//! Names are parsed once and kept in canonical form so that two names
//! written with properties in different orders compare equal and hash
//! identically.

use crate::error::BeanError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A structured management bean name.
///
/// The textual form is `domain:key=value,key=value,...`. The domain must be
/// non-empty, at least one key property is required, and duplicate keys are
/// rejected. Properties are stored sorted by key, so the canonical string
/// form is order-independent.
///
/// # Example
/// ```
/// use lattice_mgmt::BeanName;
///
/// let a: BeanName = "lattice:type=node,name=admin".parse().unwrap();
/// let b: BeanName = "lattice:name=admin,type=node".parse().unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "lattice:name=admin,type=node");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BeanName {
    domain: String,
    properties: BTreeMap<String, String>,
}

impl BeanName {
    /// Parse a name from its textual form.
    pub fn parse(text: &str) -> Result<Self, BeanError> {
        let (domain, props) = text
            .split_once(':')
            .ok_or_else(|| BeanError::invalid_name(text, "missing ':' separator"))?;

        if domain.is_empty() {
            return Err(BeanError::invalid_name(text, "empty domain"));
        }
        if props.is_empty() {
            return Err(BeanError::invalid_name(text, "no key properties"));
        }

        let mut properties = BTreeMap::new();
        for pair in props.split(',') {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| BeanError::invalid_name(text, format!("malformed property '{pair}'")))?;
            if key.is_empty() {
                return Err(BeanError::invalid_name(text, "empty property key"));
            }
            if properties.insert(key.to_string(), value.to_string()).is_some() {
                return Err(BeanError::invalid_name(text, format!("duplicate key '{key}'")));
            }
        }

        Ok(Self {
            domain: domain.to_string(),
            properties,
        })
    }

    /// Build a name from a domain and key/value pairs.
    ///
    /// Fails on an empty domain, an empty pair list or duplicate keys.
    pub fn build<I, K, V>(domain: impl Into<String>, pairs: I) -> Result<Self, BeanError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let domain = domain.into();
        if domain.is_empty() {
            return Err(BeanError::invalid_name("", "empty domain"));
        }

        let mut properties = BTreeMap::new();
        for (key, value) in pairs {
            let key = key.into();
            if key.is_empty() {
                return Err(BeanError::invalid_name(&domain, "empty property key"));
            }
            if properties.insert(key.clone(), value.into()).is_some() {
                return Err(BeanError::invalid_name(
                    &domain,
                    format!("duplicate key '{key}'"),
                ));
            }
        }
        if properties.is_empty() {
            return Err(BeanError::invalid_name(&domain, "no key properties"));
        }

        Ok(Self { domain, properties })
    }

    /// The name's domain part.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Look up one key property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Iterate key properties in canonical (alphabetical) order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for BeanName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.domain)?;
        let mut first = true;
        for (key, value) in &self.properties {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for BeanName {
    type Err = BeanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BeanName::parse(s)
    }
}

impl Serialize for BeanName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BeanName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        BeanName::parse(&text).map_err(serde::de::Error::custom)
    }
}
