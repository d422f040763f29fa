//! Fixed-width day presence mask.
//!
//! The statistics cache stores which days of a month have a check-in as a
//! 31-bit vector: bit *i* set ⟺ day *i+1* is marked. The canonical persisted
//! encoding is a 31-character `'0'`/`'1'` string, but older rows carry legacy
//! encodings (short/long raw bit strings, comma-delimited digit lists, JSON
//! arrays). Reads go through one tolerant decoder; writes always emit the
//! canonical form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

/// Presence bitmask over the days of one month.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct DayMask(u32);

impl DayMask {
    /// Fixed width of the mask (maximum days in any month).
    pub const DAYS: usize = 31;

    const VALID_BITS: u32 = (1 << Self::DAYS as u32) - 1;

    /// Mask with no days marked.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Build a mask from zero-based day indices; out-of-range indices are ignored.
    pub fn from_day_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Self::empty();
        for i in indices {
            mask.set(i);
        }
        mask
    }

    /// Whether the bit for zero-based day index `i` is set.
    pub fn is_set(&self, i: usize) -> bool {
        i < Self::DAYS && self.0 & (1 << i as u32) != 0
    }

    /// Set the bit for zero-based day index `i` (no-op out of range).
    pub fn set(&mut self, i: usize) {
        if i < Self::DAYS {
            self.0 |= 1 << i as u32;
        }
    }

    /// Clear the bit for zero-based day index `i` (no-op out of range).
    pub fn clear(&mut self, i: usize) {
        if i < Self::DAYS {
            self.0 &= !(1 << i as u32);
        }
    }

    /// Number of marked days (popcount).
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Canonical persisted form: exactly 31 characters of `'0'`/`'1'`.
    pub fn encode(&self) -> String {
        (0..Self::DAYS)
            .map(|i| if self.is_set(i) { '1' } else { '0' })
            .collect()
    }

    /// Decode a stored mask, tolerating legacy encodings.
    ///
    /// Accepted forms:
    /// - canonical or short/long raw bit strings (`"10100…"`), truncated/padded
    ///   to 31 bits;
    /// - comma-delimited digit lists (`"1,0,1"`);
    /// - JSON arrays of numbers, bools, or digit strings (`"[1,0,1]"`).
    ///
    /// Anything unrecognized decodes as an unset bit; the result is always a
    /// well-formed 31-bit mask.
    pub fn decode_lenient(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::empty();
        }

        if raw.starts_with('[') {
            if let Ok(JsonValue::Array(items)) = serde_json::from_str::<JsonValue>(raw) {
                return Self::from_truthy(items.iter().map(json_truthy));
            }
            return Self::empty();
        }

        if raw.contains(',') {
            return Self::from_truthy(raw.split(',').map(|s| s.trim() == "1"));
        }

        Self::from_truthy(raw.chars().map(|c| c == '1'))
    }

    fn from_truthy(bits: impl IntoIterator<Item = bool>) -> Self {
        let mut mask = Self::empty();
        for (i, set) in bits.into_iter().take(Self::DAYS).enumerate() {
            if set {
                mask.set(i);
            }
        }
        mask
    }

    /// Raw bit representation; bits above day 31 are always zero.
    pub fn bits(&self) -> u32 {
        self.0 & Self::VALID_BITS
    }
}

fn json_truthy(v: &JsonValue) -> bool {
    match v {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_i64().is_some_and(|i| i != 0),
        JsonValue::String(s) => s.trim() == "1",
        _ => false,
    }
}

impl Serialize for DayMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for DayMask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::decode_lenient(&s))
    }
}
