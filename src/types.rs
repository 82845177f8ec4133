// =============================================================================
// Shared types used across the Meridian signal engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Directional opinion of a single predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Flat => write!(f, "FLAT"),
        }
    }
}

/// Forward-looking timeframe a prediction applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Horizon {
    H1,
    D1,
    D5,
    D30,
}

impl Horizon {
    /// Short label used in log output and store file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H1 => "1h",
            Self::D1 => "1d",
            Self::D5 => "5d",
            Self::D30 => "30d",
        }
    }

    /// All horizons the engine evaluates, in ascending order.
    pub fn all() -> [Horizon; 4] {
        [Self::H1, Self::D1, Self::D5, Self::D30]
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final categorical recommendation for an instrument/horizon pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    StrongBuy,
    Buy,
    Hold,
    Cautious,
    Avoid,
}

impl Default for Verdict {
    fn default() -> Self {
        Self::Hold
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongBuy => write!(f, "STRONG_BUY"),
            Self::Buy => write!(f, "BUY"),
            Self::Hold => write!(f, "HOLD"),
            Self::Cautious => write!(f, "CAUTIOUS"),
            Self::Avoid => write!(f, "AVOID"),
        }
    }
}

/// One predictor's opinion about an instrument at a point in time.
///
/// Confidence is always within [0, 1] once a signal has passed the collector
/// boundary; anything outside that range is rejected before it gets here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Stable identifier of the predictor (e.g. "technical", "lstm").
    pub source_id: String,
    pub instrument_id: String,
    pub direction: Direction,
    pub confidence: f64,
    pub horizon: Horizon,
    pub observed_at: DateTime<Utc>,
}

/// Key identifying the single active decision slot for an instrument/horizon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionKey {
    pub instrument_id: String,
    pub horizon: Horizon,
}

impl DecisionKey {
    pub fn new(instrument_id: impl Into<String>, horizon: Horizon) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            horizon,
        }
    }
}

impl std::fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.instrument_id, self.horizon)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_labels() {
        assert_eq!(Horizon::H1.as_str(), "1h");
        assert_eq!(Horizon::D30.as_str(), "30d");
        assert_eq!(Horizon::all().len(), 4);
    }

    #[test]
    fn verdict_display_matches_wire_format() {
        assert_eq!(Verdict::StrongBuy.to_string(), "STRONG_BUY");
        assert_eq!(Verdict::Cautious.to_string(), "CAUTIOUS");
    }

    #[test]
    fn decision_key_display() {
        let key = DecisionKey::new("RELIANCE", Horizon::D5);
        assert_eq!(key.to_string(), "RELIANCE/5d");
    }

    #[test]
    fn signal_roundtrip_serialisation() {
        let signal = Signal {
            source_id: "technical".to_string(),
            instrument_id: "TCS".to_string(),
            direction: Direction::Up,
            confidence: 0.82,
            horizon: Horizon::D1,
            observed_at: Utc::now(),
        };
        let json = serde_json::to_string(&signal).unwrap();
        let back: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(signal, back);
    }
}
