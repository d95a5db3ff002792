//! Match tiers.

use crate::config::MatchConfig;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Confidence bucket for a cross-store correspondence.
///
/// Ordered so that a better tier compares greater: `Perfect > Excellent > ...
/// > NoMatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchTier {
    NoMatch,
    Poor,
    Fair,
    Good,
    Excellent,
    /// Exact normalized key.
    Perfect,
}

impl MatchTier {
    /// Tier for a fuzzy score. `Perfect` is reserved for exact keys and is
    /// never produced here.
    pub fn from_score(score: f64) -> Self {
        if score >= MatchConfig::EXCELLENT_THRESHOLD {
            MatchTier::Excellent
        } else if score >= MatchConfig::GOOD_THRESHOLD {
            MatchTier::Good
        } else if score >= MatchConfig::FAIR_THRESHOLD {
            MatchTier::Fair
        } else if score >= MatchConfig::POOR_THRESHOLD {
            MatchTier::Poor
        } else {
            MatchTier::NoMatch
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::NoMatch => "NO_MATCH",
            MatchTier::Poor => "POOR",
            MatchTier::Fair => "FAIR",
            MatchTier::Good => "GOOD",
            MatchTier::Excellent => "EXCELLENT",
            MatchTier::Perfect => "PERFECT",
        }
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchTier {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PERFECT" => Ok(MatchTier::Perfect),
            "EXCELLENT" => Ok(MatchTier::Excellent),
            "GOOD" => Ok(MatchTier::Good),
            "FAIR" => Ok(MatchTier::Fair),
            "POOR" => Ok(MatchTier::Poor),
            "NO_MATCH" => Ok(MatchTier::NoMatch),
            other => Err(SyncError::config(format!("unknown match tier: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(MatchTier::Perfect > MatchTier::Excellent);
        assert!(MatchTier::Excellent > MatchTier::Good);
        assert!(MatchTier::Poor > MatchTier::NoMatch);
    }

    #[test]
    fn test_from_score_thresholds() {
        assert_eq!(MatchTier::from_score(1.0), MatchTier::Excellent);
        assert_eq!(MatchTier::from_score(0.95), MatchTier::Excellent);
        assert_eq!(MatchTier::from_score(0.949), MatchTier::Good);
        assert_eq!(MatchTier::from_score(0.80), MatchTier::Good);
        assert_eq!(MatchTier::from_score(0.70), MatchTier::Fair);
        assert_eq!(MatchTier::from_score(0.50), MatchTier::Poor);
        assert_eq!(MatchTier::from_score(0.49), MatchTier::NoMatch);
    }

    #[test]
    fn test_parse_and_serialize() {
        assert_eq!("good".parse::<MatchTier>().unwrap(), MatchTier::Good);
        assert_eq!("no-match".parse::<MatchTier>().unwrap(), MatchTier::NoMatch);
        assert!("great".parse::<MatchTier>().is_err());
        assert_eq!(serde_json::to_string(&MatchTier::NoMatch).unwrap(), "\"NO_MATCH\"");
    }
}
