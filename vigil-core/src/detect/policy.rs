//! Acceptance policy: which detector outputs count as a positive.
//!
//! A policy is an ordered table of rules; a detection is accepted when any
//! rule matches. Labels are compared lowercased. The table is plain serde
//! data so deployments can ship it alongside their model:
//!
//! ```json
//! { "version": 1,
//!   "rules": [ { "kind": "substring", "labels": ["fire", "smoke"] },
//!              { "kind": "confidence_override", "minConfidence": 0.7 } ] }
//! ```

use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::error::{Result, VigilError};

pub const POLICY_VERSION: u32 = 1;

/// Label keywords for fire / smoke models.
pub const FIRE_LABELS: &[&str] = &["fire", "flame", "smoke", "burning", "blaze", "flames"];

/// Label keywords for weapon-like threats.
pub const THREAT_LABELS: &[&str] = &[
    "gun", "handgun", "pistol", "rifle", "knife", "weapon", "firearm",
];

/// Confidence above which a fire model's output is trusted regardless of label.
pub const FIRE_CONFIDENCE_OVERRIDE: f32 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcceptanceRule {
    /// Label equals one of `labels`.
    Exact { labels: Vec<String> },
    /// Label contains one of `labels`.
    Substring { labels: Vec<String> },
    /// Every output is a positive. Only for single-purpose models.
    AcceptAll,
    /// Confidence strictly greater than `min_confidence`.
    #[serde(rename_all = "camelCase")]
    ConfidenceOverride { min_confidence: f32 },
}

impl AcceptanceRule {
    fn matches(&self, label_lower: &str, score: f32) -> bool {
        match self {
            AcceptanceRule::Exact { labels } => labels
                .iter()
                .any(|l| l.trim().eq_ignore_ascii_case(label_lower)),
            AcceptanceRule::Substring { labels } => labels.iter().any(|l| {
                let needle = l.trim().to_lowercase();
                !needle.is_empty() && label_lower.contains(&needle)
            }),
            AcceptanceRule::AcceptAll => true,
            AcceptanceRule::ConfidenceOverride { min_confidence } => score > *min_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptancePolicy {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<AcceptanceRule>,
}

fn default_version() -> u32 {
    POLICY_VERSION
}

impl AcceptancePolicy {
    pub fn new(rules: Vec<AcceptanceRule>) -> Self {
        Self {
            version: POLICY_VERSION,
            rules,
        }
    }

    /// Fire / smoke keywords plus the high-confidence override.
    pub fn fire() -> Self {
        Self::new(vec![
            AcceptanceRule::Substring {
                labels: owned(FIRE_LABELS),
            },
            AcceptanceRule::ConfidenceOverride {
                min_confidence: FIRE_CONFIDENCE_OVERRIDE,
            },
        ])
    }

    /// Weapon keywords only.
    pub fn threat() -> Self {
        Self::new(vec![AcceptanceRule::Substring {
            labels: owned(THREAT_LABELS),
        }])
    }

    /// For a model trained on nothing but the target class.
    pub fn accept_all() -> Self {
        Self::new(vec![AcceptanceRule::AcceptAll])
    }

    /// Parse and validate a JSON policy document.
    pub fn from_json(json: &str) -> Result<Self> {
        let policy: Self = serde_json::from_str(json)
            .map_err(|e| VigilError::InvalidConfig(format!("acceptance policy: {e}")))?;
        policy.validate()?;
        Ok(policy)
    }

    /// # Errors
    /// `VigilError::InvalidConfig` for an unknown version or an override
    /// threshold outside [0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.version != POLICY_VERSION {
            return Err(VigilError::InvalidConfig(format!(
                "unsupported acceptance policy version {} (expected {POLICY_VERSION})",
                self.version
            )));
        }
        for rule in &self.rules {
            if let AcceptanceRule::ConfidenceOverride { min_confidence } = rule {
                if !(0.0..=1.0).contains(min_confidence) {
                    return Err(VigilError::InvalidConfig(format!(
                        "confidence override {min_confidence} outside [0, 1]"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn accepts(&self, detection: &Detection) -> bool {
        let label = detection.label.to_lowercase();
        self.rules.iter().any(|r| r.matches(&label, detection.score))
    }

    pub fn is_accept_all(&self) -> bool {
        self.rules.iter().any(|r| matches!(r, AcceptanceRule::AcceptAll))
    }
}

fn owned(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| s.to_string()).collect()
}
