//! Attribute-match filters restricting which devices are reported.

use std::collections::BTreeMap;

use crate::attributes::{AttributeKey, AttributeValue, DeviceAttributes};
use crate::error::MonitorResult;

/// Attribute values a device must carry, all of them, to match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterClause {
    required: BTreeMap<AttributeKey, AttributeValue>,
}

impl FilterClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`FilterClause::require`].
    pub fn with(mut self, key: AttributeKey, value: impl Into<AttributeValue>) -> Self {
        self.require(key, value);
        self
    }

    pub fn require(&mut self, key: AttributeKey, value: impl Into<AttributeValue>) {
        self.required.insert(key, value.into());
    }

    /// Parse a clause from canonical key names.
    pub fn parse<I, K, V>(pairs: I) -> MonitorResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<AttributeValue>,
    {
        let mut clause = FilterClause::new();
        for (key, value) in pairs {
            clause.require(key.as_ref().parse()?, value);
        }
        Ok(clause)
    }

    pub fn matches(&self, attributes: &DeviceAttributes) -> bool {
        self.required
            .iter()
            .all(|(key, value)| attributes.get(*key) == value)
    }
}

/// OR of [`FilterClause`]s. A filter without clauses matches every device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    clauses: Vec<FilterClause>,
}

impl DeviceFilter {
    /// Build a filter from clauses keyed by canonical attribute names, such as
    /// `[[("ID_VENDOR_ID", "046d")]]`. Unknown names are rejected.
    pub fn new<C, I, K, V>(clauses: C) -> MonitorResult<Self>
    where
        C: IntoIterator<Item = I>,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<AttributeValue>,
    {
        let clauses = clauses
            .into_iter()
            .map(FilterClause::parse)
            .collect::<MonitorResult<Vec<_>>>()?;
        Ok(Self { clauses })
    }

    pub fn from_clauses(clauses: impl IntoIterator<Item = FilterClause>) -> Self {
        Self {
            clauses: clauses.into_iter().collect(),
        }
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, attributes: &DeviceAttributes) -> bool {
        self.clauses.is_empty() || self.clauses.iter().any(|c| c.matches(attributes))
    }
}

/// Whether `attributes` passes `filter`; no filter passes everything.
pub fn matches(attributes: &DeviceAttributes, filter: Option<&DeviceFilter>) -> bool {
    filter.map_or(true, |f| f.matches(attributes))
}
