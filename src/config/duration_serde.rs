//! Serde helpers for human-readable durations in configuration files.
//!
//! Config values accept either bare seconds (`45`) or a humantime string
//! (`"30s"`, `"15m"`, `"2h"`). Both entry points funnel through one
//! untagged raw form instead of per-type visitors, so the required and
//! optional variants cannot drift apart.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serializer};
use std::time::Duration;

/// What a duration looks like on the wire before conversion
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration<E: de::Error>(self) -> Result<Duration, E> {
        match self {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(text) => humantime::parse_duration(&text)
                .map_err(|e| E::custom(format!("invalid duration '{text}': {e}"))),
        }
    }
}

fn format(duration: &Duration) -> String {
    humantime::format_duration(*duration).to_string()
}

/// `#[serde(with = "duration")]` for `Duration` fields
pub mod duration {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawDuration::deserialize(deserializer)?.into_duration()
    }
}

/// `#[serde(with = "option_duration")]` for `Option<Duration>` fields
pub mod option_duration {
    use super::*;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&format(d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<RawDuration>::deserialize(deserializer)?
            .map(RawDuration::into_duration)
            .transpose()
    }
}
