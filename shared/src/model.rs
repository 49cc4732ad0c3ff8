use serde::{Deserialize, Serialize};

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::geolocation::GeocodeCache;
use crate::offline_store::{OfflineQueue, QueueCounts};
use crate::tracking::{ComplaintRecord, TrackingView};
use crate::wizard::{Outcome, PendingOp, Wizard, WizardStep};
use crate::{AppError, UnixTimeMs};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
}

impl Toast {
    pub fn new(kind: ToastKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum TrackingState {
    #[default]
    Idle,
    Loading {
        complaint_id: String,
    },
    Loaded(Box<ComplaintRecord>),
    Failed(AppError),
}

/// Everything the core knows. Owned by the app; shells only ever see the
/// [`ViewModel`].
#[derive(Debug)]
pub struct Model {
    pub config: ClientConfig,
    pub api: ApiClient,
    pub wizard: Wizard,

    // Offline-first
    pub network_online: bool,
    pub queue: OfflineQueue,
    /// The stored queue has been read (or found absent). Until then the
    /// in-memory queue may be missing older entries and is not written.
    pub queue_loaded: bool,

    // Autosave
    pub autosave_generation: u64,
    /// Wizard revision covered by the last autosave timer.
    pub scheduled_revision: u64,

    pub geocode_cache: GeocodeCache,
    pub tracking: TrackingState,

    // Generic UI state
    pub active_error: Option<AppError>,
    pub active_toast: Option<Toast>,

    pub now: UnixTimeMs,
}

impl Default for Model {
    fn default() -> Self {
        Self::with_client(ClientConfig::default(), ApiClient::default())
    }
}

impl Model {
    pub fn new(config: ClientConfig) -> Result<Self, AppError> {
        config
            .validate()
            .map_err(|e| AppError::new(crate::ErrorKind::Validation, e.to_string()))?;
        let api = ApiClient::new(&config.api_base_url)?;
        Ok(Self::with_client(config, api))
    }

    fn with_client(config: ClientConfig, api: ApiClient) -> Self {
        let wizard = Wizard::new(crate::SessionId::generate(), config.user_retry);
        Self {
            config,
            api,
            wizard,
            network_online: true,
            queue: OfflineQueue::new(),
            queue_loaded: false,
            autosave_generation: 0,
            scheduled_revision: 0,
            geocode_cache: GeocodeCache::default(),
            tracking: TrackingState::Idle,
            active_error: None,
            active_toast: None,
            now: UnixTimeMs::now(),
        }
    }

    pub fn update_timestamp(&mut self) {
        self.now = UnixTimeMs::now();
    }

    pub fn show_toast(&mut self, kind: ToastKind, message: impl Into<String>) {
        self.active_toast = Some(Toast::new(kind, message));
    }
}

// --- View model ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LocationView {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_text: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DuplicateCandidateView {
    pub complaint_id: String,
    pub category: String,
    pub distance_text: String,
    pub status: String,
    pub address: Option<String>,
    pub reported: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DuplicatePromptView {
    pub primary: DuplicateCandidateView,
    pub others: Vec<DuplicateCandidateView>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WizardView {
    pub step: WizardStep,
    pub step_title: String,
    pub step_number: usize,
    pub step_count: usize,
    pub completed_steps: Vec<WizardStep>,
    pub busy: Option<PendingOp>,

    pub photo_data_uri: Option<String>,
    pub photo_error: Option<String>,

    pub categories: Vec<String>,
    pub category: Option<String>,
    pub category_overridden: bool,
    pub ai_confidence: Option<f32>,
    /// What the classifier said before a low score sent it to the catch-all.
    pub low_confidence_suggestion: Option<String>,
    pub alternatives: Vec<String>,
    pub classification_error: Option<String>,
    pub needs_category_override: bool,
    pub can_retry_classification: bool,

    pub location: Option<LocationView>,
    pub address: Option<String>,
    pub location_error: Option<String>,
    pub location_needs_settings: bool,

    pub description: String,
    pub description_remaining: usize,

    pub duplicate_prompt: Option<DuplicatePromptView>,
    pub duplicates_unverified: bool,

    pub submission_error: Option<String>,
    pub can_go_next: bool,
    pub can_submit: bool,
    pub outcome: Option<Outcome>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct QueueItemView {
    pub offline_id: String,
    pub category: String,
    pub status: String,
    pub attempts: u32,
    pub queued: String,
    pub last_error: Option<String>,
    pub awaiting_confirmation: bool,
    pub complaint_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct QueueView {
    pub items: Vec<QueueItemView>,
    pub counts: QueueCounts,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct TrackingPanelView {
    pub loading: bool,
    pub record: Option<TrackingView>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ViewModel {
    pub online: bool,
    pub wizard: WizardView,
    pub queue: QueueView,
    pub tracking: TrackingPanelView,
    pub toast: Option<Toast>,
    pub error: Option<String>,
}
