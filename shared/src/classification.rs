//! Interpretation of the image classifier's answer.
//!
//! The classifier reports a coarse confidence bucket. The bucket maps to a
//! fixed score, and anything under the threshold is pushed into the
//! catch-all category so a shaky guess never routes a complaint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::category::Category;
use crate::{AppError, ErrorKind, DEFAULT_CONFIDENCE_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLabel {
    High,
    Medium,
    Low,
    None,
}

impl ConfidenceLabel {
    #[must_use]
    pub const fn score(self) -> f32 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.65,
            Self::Low => 0.35,
            Self::None => 0.0,
        }
    }

    /// Unknown buckets count as no confidence at all.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
    pub fn new(value: f32) -> Result<Self, InvalidThreshold> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidThreshold(value))
        }
    }

    #[must_use]
    pub const fn value(self) -> f32 {
        self.0
    }

    #[must_use]
    pub fn accepts(self, score: f32) -> bool {
        score >= self.0
    }
}

impl Default for ConfidenceThreshold {
    fn default() -> Self {
        Self(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl TryFrom<f32> for ConfidenceThreshold {
    type Error = InvalidThreshold;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConfidenceThreshold> for f32 {
    fn from(value: ConfidenceThreshold) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("confidence threshold {0} is outside [0, 1]")]
pub struct InvalidThreshold(pub f32);

/// Body of a successful `POST /complaints/classify`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyResponse {
    pub category: String,
    #[serde(default)]
    pub confidence: String,
    #[serde(default)]
    pub raw_label: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub all_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub category: Category,
    pub confidence: ConfidenceLabel,
    pub score: f32,
    /// What the server said before the threshold was applied.
    pub server_category: Category,
    pub raw_label: Option<String>,
    /// The server named a specific category but the score was too low.
    pub downgraded: bool,
    /// Other categories the model considered, most likely first.
    pub alternatives: Vec<Category>,
}

impl Prediction {
    #[must_use]
    pub fn from_response(response: &ClassifyResponse, threshold: ConfidenceThreshold) -> Self {
        let confidence = ConfidenceLabel::parse(&response.confidence);
        let score = confidence.score();
        let server_category = Category::from_label(&response.category);

        let category = if threshold.accepts(score) {
            server_category
        } else {
            Category::CATCH_ALL
        };

        let mut ranked: Vec<(Category, f64)> = response
            .all_scores
            .iter()
            .filter(|(_, p)| p.is_finite())
            .map(|(label, p)| (Category::from_label(label), *p))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut alternatives = Vec::new();
        for (candidate, _) in ranked {
            if candidate != category && !candidate.is_catch_all() && !alternatives.contains(&candidate) {
                alternatives.push(candidate);
            }
        }

        Self {
            category,
            confidence,
            score,
            server_category,
            raw_label: response.raw_label.clone(),
            downgraded: category != server_category,
            alternatives,
        }
    }

    /// A prediction the wizard can use without asking the user.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        !self.category.is_catch_all()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ClassificationError {
    #[error("classifier unreachable: {message}")]
    Network { message: String },

    #[error("classification timed out")]
    Timeout,

    #[error("classifier returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("unreadable classifier response: {reason}")]
    InvalidResponse { reason: String },
}

impl ClassificationError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Network { .. } => {
                "Couldn't reach the image classifier. Retry, or pick a category yourself.".into()
            }
            Self::Timeout => {
                "The image classifier took too long. Retry, or pick a category yourself.".into()
            }
            Self::Server { message, .. } => message.clone(),
            Self::InvalidResponse { .. } => {
                "Classification failed. Please pick a category yourself.".into()
            }
        }
    }
}

impl From<ClassificationError> for AppError {
    fn from(e: ClassificationError) -> Self {
        let kind = match &e {
            ClassificationError::Network { .. } => ErrorKind::Network,
            ClassificationError::Timeout => ErrorKind::Timeout,
            ClassificationError::Server { .. } => ErrorKind::Classification,
            ClassificationError::InvalidResponse { .. } => ErrorKind::Deserialization,
        };
        AppError::new(kind, e.user_message()).with_internal(e.to_string())
    }
}
