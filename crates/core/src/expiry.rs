//! Link lifetime options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::{Duration, OffsetDateTime};

/// How long a completed upload stays resolvable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpiresIn {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[default]
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl ExpiresIn {
    /// Every accepted option, shortest first.
    pub const ALL: [ExpiresIn; 4] = [
        ExpiresIn::OneHour,
        ExpiresIn::OneDay,
        ExpiresIn::SevenDays,
        ExpiresIn::ThirtyDays,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::OneHour => Duration::hours(1),
            Self::OneDay => Duration::days(1),
            Self::SevenDays => Duration::days(7),
            Self::ThirtyDays => Duration::days(30),
        }
    }

    /// Parse a client supplied value, falling back to `default` when it is
    /// missing or not one of the accepted options.
    pub fn resolve(value: Option<&str>, default: ExpiresIn) -> ExpiresIn {
        value
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Expiry instant for an upload made at `from`.
    pub fn expires_at(&self, from: OffsetDateTime) -> OffsetDateTime {
        from + self.duration()
    }
}

impl FromStr for ExpiresIn {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidExpiry(s.to_string()))
    }
}

impl fmt::Display for ExpiresIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
