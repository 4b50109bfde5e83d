//! Core record type definitions.
//!
//! Defines [`Sector`] (the five semantic categories), [`MemoryRecord`] (a full
//! record row), and [`RecordPatch`] (the partial-update payload).

use serde::{Deserialize, Serialize};

/// The five semantic sectors a memory record is classified into.
///
/// A record's sector is immutable after creation; changes go through the
/// engine's explicit reclassify operation, which also re-indexes vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    /// Events, sessions, things that happened — fast decay.
    Episodic,
    /// Facts and knowledge — slow decay, the default sector.
    Semantic,
    /// Workflows, how-to steps, commands — slow decay.
    Procedural,
    /// Affect-laden content — medium decay.
    Emotional,
    /// Insights, lessons, conclusions — medium decay.
    Reflective,
}

impl Sector {
    pub const ALL: [Sector; 5] = [
        Self::Episodic,
        Self::Semantic,
        Self::Procedural,
        Self::Emotional,
        Self::Reflective,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Emotional => "emotional",
            Self::Reflective => "reflective",
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Sector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "emotional" => Ok(Self::Emotional),
            "reflective" => Ok(Self::Reflective),
            _ => Err(format!("unknown sector: {s}")),
        }
    }
}

/// A memory record, matching the `records` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// Owning tenant. `None` = global (visible only to unscoped callers).
    pub tenant: Option<String>,
    /// Semantic sector this record belongs to.
    pub sector: Sector,
    /// The full text content.
    pub content: String,
    /// Caller-supplied tags.
    pub tags: Vec<String>,
    /// Arbitrary JSON metadata.
    pub metadata: Option<serde_json::Value>,
    /// 64-bit simhash of the content, for near-duplicate detection.
    pub fingerprint: u64,
    /// Importance score; decays over time, boosted on access.
    pub salience: f64,
    /// Per-day exponential decay constant.
    pub decay_lambda: f64,
    /// Monotonic edit counter; bumped on content/tag/metadata edits only.
    pub version: i64,
    /// Set once the reflection task has considered this record.
    pub reflected: bool,
    /// Epoch millis.
    pub created_at: i64,
    pub updated_at: i64,
    pub last_seen_at: i64,
}

/// Partial update for a record. `None` fields are left untouched.
/// Applying a patch bumps `version` and `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.tags.is_none() && self.metadata.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn sector_round_trips_through_strings() {
        for sector in Sector::ALL {
            assert_eq!(Sector::from_str(sector.as_str()).unwrap(), sector);
        }
        assert!(Sector::from_str("entity").is_err());
    }

    #[test]
    fn sector_serde_uses_snake_case() {
        let json = serde_json::to_string(&Sector::Reflective).unwrap();
        assert_eq!(json, "\"reflective\"");
    }
}
