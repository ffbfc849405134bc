//! The incident record — the unit of tracked remediation work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::IncidentState;
use crate::timeline::Timeline;

/// Severity of an incident. Informational only — it never affects
/// transition logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Where the incident was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Ci,
    Logs,
    Monitoring,
    Webhook,
    Manual,
}

impl Default for Source {
    fn default() -> Self {
        Self::Manual
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ci => write!(f, "ci"),
            Self::Logs => write!(f, "logs"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::Webhook => write!(f, "webhook"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Repository the incident points at. Opaque to the lifecycle engine —
/// passed through to the stage adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub url: String,
    #[serde(default = "RepositoryInfo::default_branch")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl RepositoryInfo {
    fn default_branch() -> String {
        "main".to_string()
    }

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: Self::default_branch(),
            commit: None,
        }
    }

    /// Owner segment of a forge-style URL (`https://host/owner/name`).
    pub fn owner(&self) -> Option<&str> {
        let mut parts = self.url.trim_end_matches('/').rsplit('/');
        parts.next()?;
        parts.next()
    }

    /// Repository name with any `.git` suffix stripped.
    pub fn name(&self) -> Option<&str> {
        let last = self.url.trim_end_matches('/').rsplit('/').next()?;
        let name = last.strip_suffix(".git").unwrap_or(last);
        (!name.is_empty()).then_some(name)
    }
}

/// Additional provenance attached at creation. Opaque pass-through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentMetadata {
    pub repository: RepositoryInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl IncidentMetadata {
    pub fn for_repository(repository: RepositoryInfo) -> Self {
        Self {
            repository,
            triggered_by: None,
            workflow_name: None,
            job_url: None,
            tags: Vec::new(),
        }
    }
}

/// Payload for creating a new incident.
#[derive(Debug, Clone, Deserialize)]
pub struct NewIncident {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub source: Source,
    /// Raw error logs / stack traces feeding the sanitizer and detective.
    #[serde(default)]
    pub logs: Option<String>,
    pub metadata: IncidentMetadata,
}

/// The full incident record.
///
/// `status`, `timeline` and the derived fields (`attempt`,
/// `patches_generated`, `latest_patch_verified`, `pr_url`,
/// `error_message`) are written exclusively through
/// [`StateMachine::advance`](crate::state_machine::StateMachine::advance) —
/// stages and API handlers never touch them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    pub metadata: IncidentMetadata,
    pub status: IncidentState,
    pub timeline: Timeline,
    /// Pipeline attempt currently running (1-indexed). Incremented on each
    /// automatic or manual re-entry.
    pub attempt: u32,
    /// How many semantic-failure retries have been spent in the current
    /// run. A manual retry resets this to grant a fresh budget.
    pub semantic_retries: u32,
    /// Patch artifacts produced across all attempts. Monotonically
    /// non-decreasing.
    pub patches_generated: u32,
    /// Most recent verifier outcome; `None` until a verifier has run.
    pub latest_patch_verified: Option<bool>,
    /// Set exactly once, when the publisher succeeds.
    pub pr_url: Option<String>,
    /// Last terminal-failure explanation. Cleared when a retry restarts the
    /// pipeline.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn create(new: NewIncident) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            severity: new.severity,
            source: new.source,
            logs: new.logs,
            metadata: new.metadata,
            status: IncidentState::Pending,
            timeline: Timeline::new(),
            attempt: 0,
            semantic_retries: 0,
            patches_generated: 0,
            latest_patch_verified: None,
            pr_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// State token of the most recent timeline event, if any.
    pub fn current_state(&self) -> Option<IncidentState> {
        self.timeline.last().map(|e| e.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_owner_and_name() {
        let repo = RepositoryInfo::new("https://github.com/acme/payments.git");
        assert_eq!(repo.owner(), Some("acme"));
        assert_eq!(repo.name(), Some("payments"));
        assert_eq!(repo.branch, "main");
    }

    #[test]
    fn repository_trailing_slash() {
        let repo = RepositoryInfo::new("https://github.com/acme/payments/");
        assert_eq!(repo.owner(), Some("acme"));
        assert_eq!(repo.name(), Some("payments"));
    }

    #[test]
    fn new_incident_starts_pending_with_empty_timeline() {
        let incident = Incident::create(NewIncident {
            title: "CI failure on main".into(),
            description: None,
            severity: Severity::default(),
            source: Source::Ci,
            logs: None,
            metadata: IncidentMetadata::for_repository(RepositoryInfo::new(
                "https://github.com/acme/payments",
            )),
        });

        assert_eq!(incident.status, IncidentState::Pending);
        assert!(incident.timeline.is_empty());
        assert_eq!(incident.patches_generated, 0);
        assert!(incident.pr_url.is_none());
        assert!(incident.error_message.is_none());
    }

    #[test]
    fn severity_and_source_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(serde_json::to_string(&Source::Webhook).unwrap(), "\"webhook\"");
    }
}
