//! Static offset corrections
//!
//! Offsets are operator-supplied corrections keyed by record field name.
//! The decoder receives them but does not apply them yet; see
//! [`crate::acquisition::decoder::apply_offsets`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single offset value. Raw-count fields take integers, physical
/// quantities take floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OffsetValue {
    Int(i64),
    Float(f64),
}

impl OffsetValue {
    pub fn as_f64(self) -> f64 {
        match self {
            OffsetValue::Int(v) => v as f64,
            OffsetValue::Float(v) => v,
        }
    }

    /// Offsets smaller than this are treated as "unset".
    pub fn is_negligible(self) -> bool {
        self.as_f64().abs() <= 1e-10
    }
}

impl fmt::Display for OffsetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.as_f64())
    }
}

/// Field name → correction table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offsets(BTreeMap<String, OffsetValue>);

impl Default for Offsets {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert("depth_top".to_string(), OffsetValue::Float(0.0));
        table.insert("depth_bottom".to_string(), OffsetValue::Float(0.0));
        table.insert("temperature_top".to_string(), OffsetValue::Int(0));
        table.insert("temperature_bottom".to_string(), OffsetValue::Int(0));
        table.insert("pressure_top".to_string(), OffsetValue::Int(0));
        table.insert("pressure_bottom".to_string(), OffsetValue::Int(0));
        Self(table)
    }
}

impl Offsets {
    /// An empty table.
    pub fn none() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, field: &str) -> Option<OffsetValue> {
        self.0.get(field).copied()
    }

    /// Set an offset. Negligible values are ignored and `false` is returned,
    /// so an operator clearing a box to zero never overwrites a real offset.
    pub fn set(&mut self, field: &str, value: OffsetValue) -> bool {
        if value.is_negligible() {
            return false;
        }
        tracing::info!(field = %field, value = %value, "Offset updated");
        self.0.insert(field.to_string(), value);
        true
    }

    /// Default table overlaid with every entry of `self`, zeros included.
    pub fn over_defaults(self) -> Self {
        let mut merged = Self::default();
        merged.0.extend(self.0);
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, OffsetValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
