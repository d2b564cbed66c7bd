//! Server identity types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric identifier of a managed game server (`sid` on the wire).
pub type ServerId = u32;

/// Upstream hosting region of a game server.
///
/// Serialised with the upstream's spelling (`"US"`, `"EU"`, `"AS"`), which is
/// also what the `REGION!` GraphQL enum expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "EU")]
    Eu,
    #[serde(rename = "AS")]
    As,
}

impl Region {
    /// Wire spelling of the region.
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Us => "US",
            Region::Eu => "EU",
            Region::As => "AS",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a region string is not one of `US`, `EU`, `AS`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown region '{0}' (expected US, EU or AS)")]
pub struct UnknownRegion(pub String);

impl FromStr for Region {
    type Err = UnknownRegion;

    /// Parses a region case-insensitively, ignoring surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Region::Us),
            "EU" => Ok(Region::Eu),
            "AS" => Ok(Region::As),
            _ => Err(UnknownRegion(s.to_string())),
        }
    }
}
