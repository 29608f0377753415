//! Session modes.
//!
//! A session runs in one of four modes, the product of a speed and a depth:
//!
//! | mode       | effect                                                        |
//! |------------|---------------------------------------------------------------|
//! | `fast`     | no clarifier, hallucination check or answer grading; 1 pass   |
//! | `slow`     | configured settings                                           |
//! | `normal`   | no persona/analysis paths, no analysis interrupt              |
//! | `research` | persona/analysis paths and the analysis interrupt             |

use serde::{Deserialize, Serialize};
use std::fmt;

use super::schema::{Limits, WorkflowSettings};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Fast,
    #[default]
    Slow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    #[default]
    Normal,
    Research,
}

/// Speed × depth
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMode {
    pub speed: Speed,
    pub depth: Depth,
}

impl RunMode {
    pub fn new(speed: Speed, depth: Depth) -> Self {
        Self { speed, depth }
    }

    pub fn fast() -> Self {
        Self::new(Speed::Fast, Depth::Normal)
    }

    pub fn research() -> Self {
        Self::new(Speed::Slow, Depth::Research)
    }

    pub fn is_research(&self) -> bool {
        self.depth == Depth::Research
    }

    /// Settings and limits in effect for a session in this mode
    pub fn apply(&self, settings: &WorkflowSettings, limits: &Limits) -> (WorkflowSettings, Limits) {
        let mut settings = settings.clone();
        let mut limits = limits.clone();

        if self.speed == Speed::Fast {
            settings.clarification = false;
            settings.hallucination_check = false;
            settings.answer_grading = false;
            limits.max_repeater_passes = 1;
        }
        if self.depth == Depth::Normal {
            settings.analysis = false;
        }
        (settings, limits)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let speed = match self.speed {
            Speed::Fast => "fast",
            Speed::Slow => "slow",
        };
        let depth = match self.depth {
            Depth::Normal => "normal",
            Depth::Research => "research",
        };
        write!(f, "{speed}/{depth}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_mode_trims_checks() {
        let (settings, limits) = RunMode::fast().apply(&WorkflowSettings::default(), &Limits::default());
        assert!(!settings.clarification);
        assert!(!settings.hallucination_check);
        assert!(!settings.answer_grading);
        assert!(settings.document_grading);
        assert_eq!(limits.max_repeater_passes, 1);
        assert!(!settings.analysis);
    }

    #[test]
    fn test_research_keeps_configured_analysis() {
        let (settings, limits) = RunMode::research().apply(&WorkflowSettings::default(), &Limits::default());
        assert!(settings.analysis);
        assert!(settings.clarification);
        assert_eq!(limits.max_repeater_passes, 3);

        let disabled = WorkflowSettings {
            analysis: false,
            ..Default::default()
        };
        let (settings, _) = RunMode::research().apply(&disabled, &Limits::default());
        assert!(!settings.analysis);
    }

    #[test]
    fn test_display() {
        assert_eq!(RunMode::default().to_string(), "slow/normal");
        assert_eq!(RunMode::new(Speed::Fast, Depth::Research).to_string(), "fast/research");
    }
}
