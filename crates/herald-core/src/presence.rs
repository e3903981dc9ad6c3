//! Presence records.
//!
//! One [`PresenceRecord`] per username lives in the ephemeral presence store.
//! It maps each announced platform to an [`AgentSession`]. A record with no
//! agents means the user is fully offline and is deleted rather than stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of presence keys in the ephemeral store.
pub const PRESENCE_KEY_PREFIX: &str = "presence:";

/// Key under which a user's record is stored.
#[must_use]
pub fn presence_key(username: &str) -> String {
    format!("{PRESENCE_KEY_PREFIX}{username}")
}

/// Live session state of one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    /// Informational client address.
    pub ip: String,
    /// Free-form status string.
    pub status: String,
    /// When the session was created. Never changes afterwards.
    pub session_start_time: DateTime<Utc>,
    /// Whether the device is in a meeting.
    #[serde(default)]
    pub is_in_meeting: bool,
}

impl AgentSession {
    /// Create a session starting at `now`.
    #[must_use]
    pub fn new(ip: impl Into<String>, status: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            ip: ip.into(),
            status: status.into(),
            session_start_time: now,
            is_in_meeting: false,
        }
    }
}

/// What an announcement did to a platform entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentChange {
    /// A new session was created.
    Created,
    /// An existing session had its address and status updated.
    Updated,
}

/// All live platforms of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub username: String,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentSession>,
}

impl PresenceRecord {
    /// Create a record with no agents.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            agents: BTreeMap::new(),
        }
    }

    /// Create or update the session for `platform`.
    ///
    /// An existing session keeps its start time and in-meeting flag; only
    /// `ip` and `status` change.
    pub fn upsert_agent(
        &mut self,
        platform: &str,
        status: &str,
        ip: &str,
        now: DateTime<Utc>,
    ) -> AgentChange {
        match self.agents.get_mut(platform) {
            Some(session) => {
                session.ip = ip.to_string();
                session.status = status.to_string();
                AgentChange::Updated
            }
            None => {
                self.agents
                    .insert(platform.to_string(), AgentSession::new(ip, status, now));
                AgentChange::Created
            }
        }
    }

    /// Set the in-meeting flag of an existing session.
    ///
    /// Returns `false` if the platform has no session.
    pub fn set_in_meeting(&mut self, platform: &str, is_in_meeting: bool) -> bool {
        match self.agents.get_mut(platform) {
            Some(session) => {
                session.is_in_meeting = is_in_meeting;
                true
            }
            None => false,
        }
    }

    /// Remove the session for `platform`.
    pub fn remove_agent(&mut self, platform: &str) -> Option<AgentSession> {
        self.agents.remove(platform)
    }

    /// Get the session for `platform`.
    #[must_use]
    pub fn agent(&self, platform: &str) -> Option<&AgentSession> {
        self.agents.get(platform)
    }

    /// Check if the user has no live platforms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Store key of this record.
    #[must_use]
    pub fn key(&self) -> String {
        presence_key(&self.username)
    }

    /// Serialize for the presence store.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a valid record.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_upsert_creates_session() {
        let now = Utc::now();
        let mut record = PresenceRecord::new("mona");

        assert_eq!(
            record.upsert_agent("phone", "online", "10.0.0.1", now),
            AgentChange::Created
        );

        let session = record.agent("phone").unwrap();
        assert_eq!(session.session_start_time, now);
        assert!(!session.is_in_meeting);
        assert_eq!(record.agents.len(), 1);
    }

    #[test]
    fn test_upsert_preserves_start_and_meeting() {
        let start = Utc::now();
        let mut record = PresenceRecord::new("mona");
        record.upsert_agent("phone", "online", "10.0.0.1", start);
        assert!(record.set_in_meeting("phone", true));

        let later = start + Duration::minutes(5);
        assert_eq!(
            record.upsert_agent("phone", "busy", "10.0.0.2", later),
            AgentChange::Updated
        );

        let session = record.agent("phone").unwrap();
        assert_eq!(session.session_start_time, start);
        assert!(session.is_in_meeting);
        assert_eq!(session.status, "busy");
        assert_eq!(session.ip, "10.0.0.2");
    }

    #[test]
    fn test_set_in_meeting_requires_session() {
        let mut record = PresenceRecord::new("mona");
        assert!(!record.set_in_meeting("tablet", true));
        assert!(record.is_empty());
    }

    #[test]
    fn test_stored_layout() {
        let mut record = PresenceRecord::new("mona");
        record.upsert_agent("desktop", "away", "127.0.0.1", Utc::now());

        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(value["username"], "mona");
        assert_eq!(value["agents"]["desktop"]["status"], "away");
        assert_eq!(value["agents"]["desktop"]["isInMeeting"], false);
        assert!(value["agents"]["desktop"]["sessionStartTime"].is_string());

        assert_eq!(record.key(), "presence:mona");
        assert_eq!(PresenceRecord::from_json(&record.to_json().unwrap()).unwrap(), record);
    }

    #[test]
    fn test_stored_record_without_agents_field() {
        let record = PresenceRecord::from_json(r#"{"username":"mona"}"#).unwrap();
        assert!(record.is_empty());
    }
}
