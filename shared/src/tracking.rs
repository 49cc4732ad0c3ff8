//! Public status lookup for a submitted complaint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{format_time_ago, UnixTimeMs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Pending,
    Assigned,
    InProgress,
    Resolved,
    Rejected,
    Closed,
    #[default]
    Unknown,
}

impl ComplaintStatus {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "pending" | "open" | "submitted" | "new" => Some(Self::Pending),
            "assigned" | "acknowledged" => Some(Self::Assigned),
            "in_progress" | "inprogress" | "working" => Some(Self::InProgress),
            "resolved" | "completed" | "done" | "fixed" => Some(Self::Resolved),
            "rejected" | "invalid" | "declined" => Some(Self::Rejected),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Assigned => "Assigned",
            Self::InProgress => "In Progress",
            Self::Resolved => "Resolved",
            Self::Rejected => "Rejected",
            Self::Closed => "Closed",
            Self::Unknown => "Unknown",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected | Self::Closed)
    }
}

impl<'de> Deserialize<'de> for ComplaintStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    #[serde(default)]
    pub status: ComplaintStatus,
    #[serde(default, alias = "comment", alias = "remarks")]
    pub note: Option<String>,
    #[serde(default, alias = "changedAt", alias = "updatedAt", alias = "date")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintRecord {
    #[serde(alias = "_id")]
    pub complaint_id: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ComplaintStatus,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
    #[serde(default)]
    pub upvotes: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatusPayload {
    Wrapped { data: ComplaintRecord },
    Bare(ComplaintRecord),
}

impl ComplaintRecord {
    /// Accepts both `{ success, data: {...} }` and a bare document.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match serde_json::from_slice::<StatusPayload>(body)? {
            StatusPayload::Wrapped { data } | StatusPayload::Bare(data) => data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItemView {
    pub status: String,
    pub note: Option<String>,
    pub when: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingView {
    pub complaint_id: String,
    pub status: String,
    pub is_terminal: bool,
    pub category: Option<String>,
    pub address: Option<String>,
    pub submitted: Option<String>,
    pub upvotes: u32,
    /// Newest first.
    pub history: Vec<HistoryItemView>,
}

impl TrackingView {
    #[must_use]
    pub fn build(record: &ComplaintRecord, now: UnixTimeMs) -> Self {
        let ago = |t: &DateTime<Utc>| format_time_ago(UnixTimeMs::from(*t).as_millis(), now.as_millis());

        let mut entries: Vec<&StatusHistoryEntry> = record.status_history.iter().collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Self {
            complaint_id: record.complaint_id.clone(),
            status: record.status.display_name().to_string(),
            is_terminal: record.status.is_terminal(),
            category: record.category.clone(),
            address: record.address.clone(),
            submitted: record.created_at.as_ref().map(ago),
            upvotes: record.upvotes,
            history: entries
                .into_iter()
                .map(|e| HistoryItemView {
                    status: e.status.display_name().to_string(),
                    note: e.note.clone(),
                    when: e.timestamp.as_ref().map(ago),
                })
                .collect(),
        }
    }
}
