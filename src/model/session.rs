use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{chrono_duration, STALENESS_DANGER, STALENESS_WARN};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    Main,
    Worker,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRole::Main => "main",
            SessionRole::Worker => "worker",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "main" => Ok(SessionRole::Main),
            "worker" => Ok(SessionRole::Worker),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown role '{other}' (expected 'main' or 'worker')"
            ))),
        }
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live agent process. `working_on` is scalar: one claim per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub role: SessionRole,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub working_on: Option<String>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        role: SessionRole,
        context: impl Into<String>,
        labels: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            context: context.into(),
            labels,
            started_at: now,
            last_heartbeat: now,
            working_on: None,
        }
    }
}

/// Soft staleness levels for dashboard readers. The registry does not
/// reclaim at these thresholds; only `cleanup` does, at 180 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Staleness {
    Fresh,
    Warn,
    Danger,
}

pub fn staleness(last_heartbeat: DateTime<Utc>, now: DateTime<Utc>) -> Staleness {
    let age = now - last_heartbeat;
    if age >= chrono_duration(STALENESS_DANGER) {
        Staleness::Danger
    } else if age >= chrono_duration(STALENESS_WARN) {
        Staleness::Warn
    } else {
        Staleness::Fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn staleness_thresholds() {
        let now = Utc::now();
        assert_eq!(staleness(now, now), Staleness::Fresh);
        assert_eq!(staleness(now - Duration::seconds(59), now), Staleness::Fresh);
        assert_eq!(staleness(now - Duration::seconds(60), now), Staleness::Warn);
        assert_eq!(staleness(now - Duration::seconds(119), now), Staleness::Warn);
        assert_eq!(
            staleness(now - Duration::seconds(120), now),
            Staleness::Danger
        );
    }
}
