use serde::{Deserialize, Serialize};

use crate::capabilities::{HttpOutcome, KvResult};
use crate::category::Category;
use crate::config::ClientConfig;
use crate::geolocation::{GeoError, GeoFix};
use crate::image_processing::{CompressedImage, ImageError, ImageSource};
use crate::wizard::{Ticket, WizardStep};
use crate::OfflineId;

// --- Event enum: no None variant, large variants boxed ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    // Lifecycle
    /// Replaces the defaults the core starts with. Shells send it once,
    /// before anything else.
    ConfigLoaded(Box<ClientConfig>),
    WizardOpened,
    WizardReset,
    NetworkStatusChanged {
        online: bool,
    },

    // Wizard
    ConsentAccepted,
    PhotoSelected(Box<ImageSource>),
    ProceedToClassify,
    RetryClassification,
    CategoryOverridden {
        category: Category,
    },
    ProceedToDetails,
    RefreshLocation,
    DescriptionChanged {
        text: String,
    },
    ProceedToPreview,
    DuplicateModalCancelled,
    NotDuplicateConfirmed,
    SubmitRequested,
    GoBack {
        to: WizardStep,
    },

    // Offline queue
    SyncRequested,
    QueuedDuplicateConfirmed {
        offline_id: OfflineId,
    },
    QueueCleanupRequested,

    // Tracking & notices
    TrackComplaintRequested {
        complaint_id: String,
    },
    DismissError,
    DismissToast,

    // Capability responses (boxed to keep enum size small)
    PhotoCompressed {
        ticket: Ticket,
        result: Box<Result<CompressedImage, ImageError>>,
    },
    ClassificationResponse {
        ticket: Ticket,
        result: Box<HttpOutcome>,
    },
    LocationResult {
        ticket: Ticket,
        result: Result<GeoFix, GeoError>,
    },
    GeocodeResponse {
        fix: GeoFix,
        result: Box<HttpOutcome>,
    },
    DuplicateCheckResponse {
        ticket: Ticket,
        result: Box<HttpOutcome>,
    },
    SubmitResponse {
        ticket: Ticket,
        result: Box<HttpOutcome>,
    },
    DraftLoaded(Box<KvResult>),
    AutosaveTimerFired {
        generation: u64,
    },
    DraftPersisted(Box<KvResult>),
    QueueLoaded(Box<KvResult>),
    /// An unreadable stored queue was copied to its quarantine key.
    QueueQuarantined(Box<KvResult>),
    QueuePersisted(Box<KvResult>),
    QueuedSyncResponse {
        offline_id: OfflineId,
        result: Box<HttpOutcome>,
    },
    TrackingResponse {
        complaint_id: String,
        result: Box<HttpOutcome>,
    },
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConfigLoaded(_) => "config_loaded",
            Self::WizardOpened => "wizard_opened",
            Self::WizardReset => "wizard_reset",
            Self::NetworkStatusChanged { .. } => "network_status_changed",
            Self::ConsentAccepted => "consent_accepted",
            Self::PhotoSelected(_) => "photo_selected",
            Self::ProceedToClassify => "proceed_to_classify",
            Self::RetryClassification => "retry_classification",
            Self::CategoryOverridden { .. } => "category_overridden",
            Self::ProceedToDetails => "proceed_to_details",
            Self::RefreshLocation => "refresh_location",
            Self::DescriptionChanged { .. } => "description_changed",
            Self::ProceedToPreview => "proceed_to_preview",
            Self::DuplicateModalCancelled => "duplicate_modal_cancelled",
            Self::NotDuplicateConfirmed => "not_duplicate_confirmed",
            Self::SubmitRequested => "submit_requested",
            Self::GoBack { .. } => "go_back",
            Self::SyncRequested => "sync_requested",
            Self::QueuedDuplicateConfirmed { .. } => "queued_duplicate_confirmed",
            Self::QueueCleanupRequested => "queue_cleanup_requested",
            Self::TrackComplaintRequested { .. } => "track_complaint_requested",
            Self::DismissError => "dismiss_error",
            Self::DismissToast => "dismiss_toast",
            Self::PhotoCompressed { .. } => "photo_compressed",
            Self::ClassificationResponse { .. } => "classification_response",
            Self::LocationResult { .. } => "location_result",
            Self::GeocodeResponse { .. } => "geocode_response",
            Self::DuplicateCheckResponse { .. } => "duplicate_check_response",
            Self::SubmitResponse { .. } => "submit_response",
            Self::DraftLoaded(_) => "draft_loaded",
            Self::AutosaveTimerFired { .. } => "autosave_timer_fired",
            Self::DraftPersisted(_) => "draft_persisted",
            Self::QueueLoaded(_) => "queue_loaded",
            Self::QueueQuarantined(_) => "queue_quarantined",
            Self::QueuePersisted(_) => "queue_persisted",
            Self::QueuedSyncResponse { .. } => "queued_sync_response",
            Self::TrackingResponse { .. } => "tracking_response",
        }
    }

    /// Events that come straight from the person using the app, as opposed
    /// to capability results.
    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::WizardReset
                | Self::ConsentAccepted
                | Self::PhotoSelected(_)
                | Self::ProceedToClassify
                | Self::RetryClassification
                | Self::CategoryOverridden { .. }
                | Self::ProceedToDetails
                | Self::RefreshLocation
                | Self::DescriptionChanged { .. }
                | Self::ProceedToPreview
                | Self::DuplicateModalCancelled
                | Self::NotDuplicateConfirmed
                | Self::SubmitRequested
                | Self::GoBack { .. }
                | Self::SyncRequested
                | Self::QueuedDuplicateConfirmed { .. }
                | Self::QueueCleanupRequested
                | Self::TrackComplaintRequested { .. }
                | Self::DismissError
                | Self::DismissToast
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_size_is_reasonable() {
        let size = std::mem::size_of::<Event>();
        assert!(
            size <= 128,
            "Event enum is {size} bytes, box more variants"
        );
    }

    #[test]
    fn user_events_are_flagged() {
        assert!(Event::SubmitRequested.is_user_initiated());
        assert!(Event::GoBack {
            to: WizardStep::Photo
        }
        .is_user_initiated());
        assert!(!Event::AutosaveTimerFired { generation: 1 }.is_user_initiated());
        assert!(!Event::WizardOpened.is_user_initiated());
    }

    #[test]
    fn events_serialize_for_the_shell_bridge() {
        let event = Event::CategoryOverridden {
            category: Category::FallenTrees,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"CategoryOverridden":{"category":"Fallen Trees"}}"#);
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
