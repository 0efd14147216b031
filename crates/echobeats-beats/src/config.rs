//! Beat schedule configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::beat::BeatKind;

/// Schedule for a single beat kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between runs.
    pub interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

impl BeatSettings {
    fn every(interval_secs: u64) -> Self {
        Self {
            enabled: true,
            interval_secs,
        }
    }

    /// Interval between runs.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Beat schedules, one table per beat kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatsConfig {
    #[serde(default = "default_cognitive_beat")]
    pub cognitive_beat: BeatSettings,

    #[serde(default = "default_knowledge_integration")]
    pub knowledge_integration: BeatSettings,

    #[serde(default = "default_wisdom_cultivation")]
    pub wisdom_cultivation: BeatSettings,

    #[serde(default = "default_dream_processing")]
    pub dream_processing: BeatSettings,

    #[serde(default = "default_interest_update")]
    pub interest_update: BeatSettings,
}

fn default_cognitive_beat() -> BeatSettings {
    BeatSettings::every(60)
}

fn default_knowledge_integration() -> BeatSettings {
    BeatSettings::every(300)
}

fn default_wisdom_cultivation() -> BeatSettings {
    BeatSettings::every(900)
}

fn default_dream_processing() -> BeatSettings {
    BeatSettings::every(3600)
}

fn default_interest_update() -> BeatSettings {
    BeatSettings::every(600)
}

impl Default for BeatsConfig {
    fn default() -> Self {
        Self {
            cognitive_beat: default_cognitive_beat(),
            knowledge_integration: default_knowledge_integration(),
            wisdom_cultivation: default_wisdom_cultivation(),
            dream_processing: default_dream_processing(),
            interest_update: default_interest_update(),
        }
    }
}

impl BeatsConfig {
    /// Settings for a beat kind.
    pub fn settings(&self, kind: BeatKind) -> &BeatSettings {
        match kind {
            BeatKind::CognitiveBeat => &self.cognitive_beat,
            BeatKind::KnowledgeIntegration => &self.knowledge_integration,
            BeatKind::WisdomCultivation => &self.wisdom_cultivation,
            BeatKind::DreamProcessing => &self.dream_processing,
            BeatKind::InterestUpdate => &self.interest_update,
        }
    }

    /// Enabled beats with their intervals, highest priority first.
    pub fn enabled_beats(&self) -> Vec<(BeatKind, Duration)> {
        BeatKind::ALL
            .into_iter()
            .filter(|kind| self.settings(*kind).enabled)
            .map(|kind| (kind, self.settings(kind).interval()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_every_beat() {
        let config = BeatsConfig::default();
        assert_eq!(config.enabled_beats().len(), 5);
        assert_eq!(config.settings(BeatKind::CognitiveBeat).interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml() {
        let config: BeatsConfig = toml::from_str(
            r#"
            [dream_processing]
            enabled = false
            interval_secs = 7200

            [cognitive_beat]
            interval_secs = 15
            "#,
        )
        .unwrap();

        assert!(!config.dream_processing.enabled);
        assert_eq!(config.cognitive_beat, BeatSettings::every(15));
        assert_eq!(config.wisdom_cultivation, BeatSettings::every(900));

        let kinds: Vec<BeatKind> = config.enabled_beats().into_iter().map(|(k, _)| k).collect();
        assert!(!kinds.contains(&BeatKind::DreamProcessing));
        assert_eq!(kinds[0], BeatKind::CognitiveBeat);
    }
}
