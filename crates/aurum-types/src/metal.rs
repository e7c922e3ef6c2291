//! Metal types for Aurum
//!
//! The refinery settles in the five precious metals it recovers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Precious metals handled by the refinery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metal {
    /// Gold
    #[serde(rename = "AU")]
    Gold,
    /// Silver
    #[serde(rename = "AG")]
    Silver,
    /// Rhodium
    #[serde(rename = "RH")]
    Rhodium,
    /// Platinum
    #[serde(rename = "PT")]
    Platinum,
    /// Palladium
    #[serde(rename = "PD")]
    Palladium,
}

impl Metal {
    /// Get the element code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Gold => "AU",
            Self::Silver => "AG",
            Self::Rhodium => "RH",
            Self::Platinum => "PT",
            Self::Palladium => "PD",
        }
    }

    /// All metals, in recovery-volume order
    pub fn all() -> [Metal; 5] {
        [
            Self::Gold,
            Self::Silver,
            Self::Rhodium,
            Self::Platinum,
            Self::Palladium,
        ]
    }
}

impl fmt::Display for Metal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Metal {
    type Err = crate::AurumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AU" | "GOLD" => Ok(Self::Gold),
            "AG" | "SILVER" => Ok(Self::Silver),
            "RH" | "RHODIUM" => Ok(Self::Rhodium),
            "PT" | "PLATINUM" => Ok(Self::Platinum),
            "PD" | "PALLADIUM" => Ok(Self::Palladium),
            other => Err(crate::AurumError::invalid_input(
                "metal",
                format!("unknown metal code: {other}"),
            )),
        }
    }
}
