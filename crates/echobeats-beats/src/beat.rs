//! The five echobeats beat kinds.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A recurring cognitive activity, each bound to one executor context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatKind {
    CognitiveBeat,
    KnowledgeIntegration,
    WisdomCultivation,
    DreamProcessing,
    InterestUpdate,
}

impl BeatKind {
    /// Every beat kind, highest priority first.
    pub const ALL: [BeatKind; 5] = [
        BeatKind::CognitiveBeat,
        BeatKind::KnowledgeIntegration,
        BeatKind::InterestUpdate,
        BeatKind::WisdomCultivation,
        BeatKind::DreamProcessing,
    ];

    /// Executor context name.
    pub fn context(&self) -> &'static str {
        match self {
            BeatKind::CognitiveBeat => "cognitive_beat",
            BeatKind::KnowledgeIntegration => "knowledge_integration",
            BeatKind::WisdomCultivation => "wisdom_cultivation",
            BeatKind::DreamProcessing => "dream_processing",
            BeatKind::InterestUpdate => "interest_update",
        }
    }

    /// Human-readable job name.
    pub fn display_name(&self) -> &'static str {
        match self {
            BeatKind::CognitiveBeat => "Cognitive Beat",
            BeatKind::KnowledgeIntegration => "Knowledge Integration",
            BeatKind::WisdomCultivation => "Wisdom Cultivation",
            BeatKind::DreamProcessing => "Dream Processing",
            BeatKind::InterestUpdate => "Interest Update",
        }
    }

    pub fn default_priority(&self) -> i32 {
        match self {
            BeatKind::CognitiveBeat => 10,
            BeatKind::KnowledgeIntegration => 5,
            BeatKind::WisdomCultivation => 3,
            BeatKind::DreamProcessing => 2,
            BeatKind::InterestUpdate => 4,
        }
    }

    /// Payload attached to newly scheduled beats.
    pub fn default_payload(&self) -> Map<String, Value> {
        let (key, value) = match self {
            BeatKind::CognitiveBeat => ("beat_type", "standard"),
            BeatKind::KnowledgeIntegration => ("integration_type", "incremental"),
            BeatKind::WisdomCultivation => ("cultivation_type", "balance_optimization"),
            BeatKind::DreamProcessing => ("processing_type", "consolidation"),
            BeatKind::InterestUpdate => ("update_type", "decay_and_reinforce"),
        };

        let mut payload = Map::new();
        payload.insert(key.to_string(), Value::String(value.to_string()));
        payload
    }

    /// Look up a beat kind by its context name.
    pub fn from_context(context: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.context() == context)
    }
}

impl fmt::Display for BeatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_round_trip() {
        for kind in BeatKind::ALL {
            assert_eq!(BeatKind::from_context(kind.context()), Some(kind));
        }
        assert_eq!(BeatKind::from_context("unknown"), None);
    }

    #[test]
    fn test_all_sorted_by_priority() {
        let priorities: Vec<i32> = BeatKind::ALL.iter().map(|k| k.default_priority()).collect();
        assert_eq!(priorities, vec![10, 5, 4, 3, 2]);
    }

    #[test]
    fn test_default_payload() {
        let payload = BeatKind::WisdomCultivation.default_payload();
        assert_eq!(payload["cultivation_type"], "balance_optimization");

        let payload = BeatKind::InterestUpdate.default_payload();
        assert_eq!(payload["update_type"], "decay_and_reinforce");
    }

    #[test]
    fn test_serde_uses_context_names() {
        let json = serde_json::to_string(&BeatKind::DreamProcessing).unwrap();
        assert_eq!(json, "\"dream_processing\"");
        assert_eq!(BeatKind::CognitiveBeat.to_string(), "Cognitive Beat");
    }
}
