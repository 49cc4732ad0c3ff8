//! Nearby existing complaints and the gate they put in front of submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::format_distance;
use crate::geolocation::GeoFix;
use crate::tracking::ComplaintStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCandidate {
    #[serde(alias = "_id", alias = "id")]
    pub complaint_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, alias = "distance")]
    pub distance_meters: f64,
    #[serde(default)]
    pub status: ComplaintStatus,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl DuplicateCandidate {
    #[must_use]
    pub fn distance_text(&self) -> String {
        format_distance(self.distance_meters)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDuplicatesRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub category: Category,
}

impl CheckDuplicatesRequest {
    #[must_use]
    pub fn new(fix: &GeoFix, category: Category) -> Self {
        Self {
            latitude: fix.latitude(),
            longitude: fix.longitude(),
            category,
        }
    }
}

/// Body of `POST /complaints/check-duplicates`, and of the 409 returned by
/// `POST /complaints` when the server finds a match itself.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub duplicates: Option<Vec<DuplicateCandidate>>,
}

impl DuplicateReport {
    /// A missing list means no block, whatever `isDuplicate` says.
    #[must_use]
    pub fn into_candidates(self) -> Vec<DuplicateCandidate> {
        self.duplicates.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum DuplicateGate {
    #[default]
    Unchecked,
    Checking,
    Clear,
    /// Candidates in server order; element 0 is the one to highlight.
    Blocked(Vec<DuplicateCandidate>),
    Confirmed(Vec<DuplicateCandidate>),
    /// The check could not run. Submission proceeds and the server's own
    /// check on create remains the backstop.
    Unverified,
}

impl DuplicateGate {
    #[must_use]
    pub fn from_candidates(candidates: Vec<DuplicateCandidate>) -> Self {
        if candidates.is_empty() {
            Self::Clear
        } else {
            Self::Blocked(candidates)
        }
    }

    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }

    #[must_use]
    pub const fn allows_submit(&self) -> bool {
        matches!(self, Self::Clear | Self::Confirmed(_) | Self::Unverified)
    }

    #[must_use]
    pub const fn confirm_not_duplicate(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    #[must_use]
    pub fn candidates(&self) -> &[DuplicateCandidate] {
        match self {
            Self::Blocked(c) | Self::Confirmed(c) => c,
            _ => &[],
        }
    }

    #[must_use]
    pub fn primary(&self) -> Option<&DuplicateCandidate> {
        self.candidates().first()
    }

    /// The user says this is a different problem. Only meaningful while
    /// blocked; returns whether the gate changed.
    pub fn confirm(&mut self) -> bool {
        match std::mem::take(self) {
            Self::Blocked(candidates) => {
                *self = Self::Confirmed(candidates);
                true
            }
            other => {
                *self = other;
                false
            }
        }
    }
}
