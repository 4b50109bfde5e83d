//! Lexical sector classifier.
//!
//! Scores a text against per-sector cue tables over its canonical tokens and
//! picks a primary sector, plus any secondary sectors that clear the cue
//! threshold. Texts with no cues land in `semantic`.

use crate::keyword::tokenize;
use crate::record::types::Sector;

/// Cue hits required before a non-primary sector is also indexed.
const SECONDARY_THRESHOLD: usize = 2;

/// Cue tables hold canonical (stemmed) tokens so they match [`tokenize`] output.
const EPISODIC_CUES: &[&str] = &[
    "yesterday", "today", "session", "meet", "happened", "went", "met",
    "morn", "week", "last", "earlier", "event", "call",
];
const PROCEDURAL_CUES: &[&str] = &[
    "how", "step", "install", "run", "build", "deploy", "configure",
    "setup", "command", "guide", "workflow", "script", "use",
];
const EMOTIONAL_CUES: &[&str] = &[
    "feel", "felt", "happy", "sad", "angry", "love", "hate", "excited",
    "frustrated", "worried", "afraid", "glad", "anxious",
];
const REFLECTIVE_CUES: &[&str] = &[
    "think", "believe", "realize", "realized", "insight", "learned",
    "lesson", "conclusion", "pattern", "why", "retrospect", "takeaway",
];

/// Classification outcome: the primary sector plus any secondary sectors
/// whose cue count cleared the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorClassification {
    pub primary: Sector,
    pub secondary: Vec<Sector>,
}

impl SectorClassification {
    /// Primary followed by secondaries — the sectors a record is indexed under.
    pub fn all(&self) -> Vec<Sector> {
        let mut out = vec![self.primary];
        out.extend(self.secondary.iter().copied());
        out
    }
}

/// Classify a text into sectors by cue-table hits.
pub fn classify(text: &str, min_token_len: usize) -> SectorClassification {
    let tokens = tokenize(text, min_token_len);

    let score = |cues: &[&str]| -> usize {
        tokens.iter().filter(|t| cues.contains(&t.as_str())).count()
    };

    // Semantic is the default and carries no cue table of its own.
    let scored = [
        (Sector::Episodic, score(EPISODIC_CUES)),
        (Sector::Procedural, score(PROCEDURAL_CUES)),
        (Sector::Emotional, score(EMOTIONAL_CUES)),
        (Sector::Reflective, score(REFLECTIVE_CUES)),
    ];

    let primary = scored
        .iter()
        .max_by_key(|(_, hits)| *hits)
        .filter(|(_, hits)| *hits > 0)
        .map(|(sector, _)| *sector)
        .unwrap_or(Sector::Semantic);

    let secondary = scored
        .iter()
        .filter(|(sector, hits)| *sector != primary && *hits >= SECONDARY_THRESHOLD)
        .map(|(sector, _)| *sector)
        .collect();

    SectorClassification { primary, secondary }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_facts_default_to_semantic() {
        let c = classify("Rust compiles to native machine code", 3);
        assert_eq!(c.primary, Sector::Semantic);
        assert!(c.secondary.is_empty());
    }

    #[test]
    fn how_to_text_is_procedural() {
        let c = classify("how to install and configure the deploy pipeline", 3);
        assert_eq!(c.primary, Sector::Procedural);
    }

    #[test]
    fn event_text_is_episodic() {
        let c = classify("yesterday the team session went long", 3);
        assert_eq!(c.primary, Sector::Episodic);
    }

    #[test]
    fn affect_text_is_emotional() {
        let c = classify("felt frustrated and worried about the outage", 3);
        assert_eq!(c.primary, Sector::Emotional);
    }

    #[test]
    fn insight_text_is_reflective() {
        let c = classify("realized the lesson here is a recurring pattern", 3);
        assert_eq!(c.primary, Sector::Reflective);
    }

    #[test]
    fn strong_mixed_signals_produce_secondary_sectors() {
        let c = classify(
            "yesterday in the session I learned a lesson about why the pattern repeats",
            3,
        );
        assert_eq!(c.primary, Sector::Reflective);
        assert!(c.secondary.contains(&Sector::Episodic));
        assert!(c.all().len() >= 2);
    }
}
