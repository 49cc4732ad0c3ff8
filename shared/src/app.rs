//! Event handling for the grievance client core.
//!
//! [`crux_core::App::update`] is the only place the model changes. Anything that needs the
//! outside world (network, storage, GPS, image codecs, timers) is asked
//! for through a capability and comes back later as another [`Event`].

use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::capabilities::{Capabilities, HttpOutcome, KvKey, KvResult, TimerOperation};
use crate::category::Category;
use crate::classification::ClassificationError;
use crate::duplicates::{DuplicateCandidate, DuplicateGate};
use crate::event::Event;
use crate::geolocation::GeolocationOperation;
use crate::image_processing::CompressOperation;
use crate::model::{
    DuplicateCandidateView, DuplicatePromptView, LocationView, Model, QueueItemView, QueueView,
    ToastKind, TrackingPanelView, TrackingState, ViewModel, WizardView,
};
use crate::offline_store::{OfflineQueue, QueuedComplaint, SavedDraft, SyncStatus};
use crate::tracking::TrackingView;
use crate::wizard::{
    ClassificationState, Command, ComplaintSubmission, Photo, StepResult, SubmitOutcome, WizardStep,
};
use crate::{format_time_ago, AppError, OfflineId, UnixTimeMs};

#[derive(Default)]
pub struct App;

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        model.update_timestamp();

        let event_name = event.name();
        if event.is_user_initiated() {
            debug!(event = event_name, "user action");
        }

        match event {
            Event::ConfigLoaded(config) => match Model::new(*config) {
                Ok(mut fresh) => {
                    info!(api = %fresh.api.base_url().as_str(), "configuration applied");
                    fresh.network_online = model.network_online;
                    fresh.queue = std::mem::take(&mut model.queue);
                    fresh.queue_loaded = model.queue_loaded;
                    *model = fresh;
                }
                Err(e) => {
                    error!(error = %e, "configuration rejected; keeping defaults");
                    model.active_error = Some(e);
                }
            },

            Event::WizardOpened => {
                caps.kv.get(KvKey::draft_slot().raw(), |r| {
                    Event::DraftLoaded(Box::new(r))
                });
                caps.kv.get(KvKey::offline_queue().raw(), |r| {
                    Event::QueueLoaded(Box::new(r))
                });
            }

            Event::WizardReset => {
                model.wizard.reset();
                Self::clear_draft(model, caps);
            }

            Event::NetworkStatusChanged { online } => {
                let was_online = model.network_online;
                model.network_online = online;
                if online && !was_online {
                    info!("network restored");
                    model.show_toast(ToastKind::Info, "You're back online.");
                    Self::sync_queue(model, caps, false);
                } else if !online && was_online {
                    info!("network lost");
                    model.show_toast(
                        ToastKind::Info,
                        "You're offline. Complaints will be saved and sent later.",
                    );
                }
            }

            // --- Wizard ---
            Event::ConsentAccepted => {
                let result = model.wizard.accept_consent();
                Self::apply(result, model, caps);
            }

            Event::PhotoSelected(source) => {
                let result = model.wizard.select_photo(*source);
                Self::apply(result, model, caps);
            }

            Event::PhotoCompressed { ticket, result } => {
                if let Err(e) = &*result {
                    debug!(error = %e, "photo could not be processed");
                }
                model.wizard.photo_processed(&ticket, *result);
            }

            Event::ProceedToClassify => {
                let result = model.wizard.proceed_to_classify();
                Self::apply(result, model, caps);
            }

            Event::RetryClassification => {
                let result = model.wizard.retry_classification();
                Self::apply(result, model, caps);
            }

            Event::ClassificationResponse { ticket, result } => {
                let prediction =
                    ApiClient::parse_classification(*result, model.config.confidence_threshold);
                match &prediction {
                    Ok(p) => info!(
                        category = p.category.label(),
                        server_category = p.server_category.label(),
                        downgraded = p.downgraded,
                        "classification received"
                    ),
                    Err(e @ (ClassificationError::Network { .. } | ClassificationError::Timeout)) => {
                        error!(error = %e, "classification request failed");
                    }
                    Err(e) => warn!(error = %e, "classification rejected"),
                }
                model.wizard.classification_finished(&ticket, prediction);
            }

            Event::CategoryOverridden { category } => {
                if let Err(blocked) = model.wizard.override_category(category) {
                    debug!(%blocked, "category override ignored");
                } else {
                    info!(category = category.label(), "category chosen by user");
                }
            }

            Event::ProceedToDetails => {
                let result = model.wizard.proceed_to_details();
                Self::apply(result, model, caps);
            }

            Event::RefreshLocation => {
                let result = model.wizard.refresh_location();
                Self::apply(result, model, caps);
            }

            Event::LocationResult { ticket, result } => {
                if let Err(e) = &result {
                    debug!(code = e.code(), "location unavailable");
                }
                if let Some(command) = model.wizard.location_finished(&ticket, result) {
                    Self::execute(command, model, caps);
                }
            }

            Event::GeocodeResponse { fix, result } => match ApiClient::parse_geocode(*result) {
                Ok(address) => {
                    model.geocode_cache.insert(&fix, address.clone());
                    model.wizard.address_resolved(&fix, address);
                }
                Err(e) => warn!(error = %e, "reverse geocoding failed"),
            },

            Event::DescriptionChanged { text } => {
                if let Err(blocked) = model.wizard.set_description(&text) {
                    debug!(%blocked, "description rejected");
                }
            }

            Event::ProceedToPreview => {
                let result = model.wizard.proceed_to_preview();
                Self::apply(result, model, caps);
            }

            Event::DuplicateCheckResponse { ticket, result } => {
                let candidates = ApiClient::parse_duplicates(*result).map_err(|e| {
                    warn!(error = %e, "duplicate check failed; continuing unverified");
                    e.to_string()
                });
                if let Ok(c) = &candidates {
                    info!(candidates = c.len(), "duplicate check complete");
                }
                model.wizard.duplicate_check_finished(&ticket, candidates);
            }

            Event::DuplicateModalCancelled => {
                if let Err(blocked) = model.wizard.dismiss_duplicates() {
                    debug!(%blocked, "no duplicate prompt to cancel");
                }
            }

            Event::NotDuplicateConfirmed => {
                let language = model.config.preferred_language.clone();
                let result = model
                    .wizard
                    .confirm_not_duplicate(model.network_online, &language);
                Self::apply(result, model, caps);
            }

            Event::SubmitRequested => {
                let language = model.config.preferred_language.clone();
                let result = model.wizard.submit(model.network_online, &language);
                Self::apply(result, model, caps);
            }

            Event::SubmitResponse { ticket, result } => {
                let outcome = ApiClient::parse_create(*result);
                match &outcome {
                    SubmitOutcome::Created(id) => info!(complaint_id = %id, "complaint created"),
                    SubmitOutcome::Duplicate(c) => {
                        info!(candidates = c.len(), "server reported a duplicate");
                    }
                    SubmitOutcome::Failed(message) => error!(%message, "complaint submission failed"),
                }
                model.wizard.submission_finished(&ticket, outcome.clone());

                if let (SubmitOutcome::Created(id), WizardStep::Success) =
                    (&outcome, model.wizard.step())
                {
                    Self::clear_draft(model, caps);
                    model.show_toast(
                        ToastKind::Success,
                        format!("Complaint submitted. Your complaint ID is {id}."),
                    );
                }
            }

            Event::GoBack { to } => {
                let result = model.wizard.go_back(to);
                Self::apply(result, model, caps);
            }

            // --- Persistence ---
            Event::DraftLoaded(result) => Self::handle_draft_loaded(*result, model, caps),

            Event::AutosaveTimerFired { generation } => {
                if generation != model.autosave_generation {
                    debug!(generation, current = model.autosave_generation, "superseded autosave timer");
                } else {
                    Self::persist_draft(model, caps);
                }
            }

            Event::DraftPersisted(result) => match *result {
                Ok(_) => debug!("draft slot updated"),
                // Autosave is best effort.
                Err(e) => warn!(error = %e, "autosave failed"),
            },

            Event::QueueLoaded(result) => Self::handle_queue_loaded(*result, model, caps),

            Event::QueueQuarantined(result) => match *result {
                Ok(_) => {
                    info!(key = %KvKey::quarantined_queue().raw(), "unreadable queue set aside");
                    Self::queue_ready(model, caps, false);
                }
                Err(e) => {
                    error!(error = %e, "unreadable queue could not be set aside; queue left untouched");
                    model.active_error = Some(e.into());
                }
            },

            Event::QueuePersisted(result) => {
                if let Err(e) = *result {
                    warn!(error = %e, "offline queue could not be saved");
                    model.active_error = Some(e.into());
                }
            }

            // --- Offline queue ---
            Event::SyncRequested => Self::sync_queue(model, caps, true),

            Event::QueuedSyncResponse { offline_id, result } => {
                Self::handle_sync_response(&offline_id, *result, model, caps);
            }

            Event::QueuedDuplicateConfirmed { offline_id } => {
                let confirmed = model
                    .queue
                    .get_mut(&offline_id)
                    .is_some_and(QueuedComplaint::confirm_not_duplicate);
                if confirmed {
                    info!(%offline_id, "queued complaint confirmed as not a duplicate");
                    if model.network_online {
                        Self::deliver(&offline_id, model, caps);
                    }
                    Self::persist_queue(model, caps);
                } else {
                    debug!(%offline_id, "nothing to confirm");
                }
            }

            Event::QueueCleanupRequested => {
                let removed = model.queue.cleanup_synced();
                if removed > 0 {
                    info!(removed, "delivered complaints removed from queue");
                    Self::persist_queue(model, caps);
                }
                model.show_toast(
                    ToastKind::Info,
                    format!("Removed {removed} delivered complaint(s)."),
                );
            }

            // --- Tracking ---
            Event::TrackComplaintRequested { complaint_id } => {
                let id = complaint_id.trim().to_string();
                let reply_id = id.clone();
                let sent = model.api.complaint_status(&caps.http, &id, move |r| {
                    Event::TrackingResponse {
                        complaint_id: reply_id,
                        result: Box::new(r),
                    }
                });
                model.tracking = match sent {
                    Ok(()) => TrackingState::Loading { complaint_id: id },
                    Err(e) => TrackingState::Failed(e.into()),
                };
            }

            Event::TrackingResponse {
                complaint_id,
                result,
            } => {
                let current = matches!(
                    &model.tracking,
                    TrackingState::Loading { complaint_id: id } if *id == complaint_id
                );
                if current {
                    model.tracking = match ApiClient::parse_status(*result) {
                        Ok(record) => TrackingState::Loaded(Box::new(record)),
                        Err(e) => {
                            warn!(%complaint_id, error = %e, "status lookup failed");
                            TrackingState::Failed(e.into())
                        }
                    };
                } else {
                    debug!(%complaint_id, "dropping status for a lookup no longer shown");
                }
            }

            Event::DismissError => model.active_error = None,
            Event::DismissToast => model.active_toast = None,
        }

        Self::schedule_autosave(model, caps);
        caps.render.render();
    }

    fn view(&self, model: &Model) -> ViewModel {
        ViewModel {
            online: model.network_online,
            wizard: Self::wizard_view(model),
            queue: Self::queue_view(model),
            tracking: Self::tracking_view(model),
            toast: model.active_toast.clone(),
            error: model
                .active_error
                .as_ref()
                .map(AppError::user_facing_message),
        }
    }
}

impl App {
    // --- Wizard commands ---

    fn apply(result: StepResult, model: &mut Model, caps: &Capabilities) {
        match result {
            Ok(Some(command)) => Self::execute(command, model, caps),
            Ok(None) => {}
            Err(blocked) => debug!(%blocked, step = ?model.wizard.step(), "action blocked"),
        }
    }

    fn execute(command: Command, model: &mut Model, caps: &Capabilities) {
        let ticket = model.wizard.ticket();
        match command {
            Command::Compress(source) => {
                let operation = CompressOperation {
                    source,
                    limits: model.config.compression,
                };
                caps.compress.run(operation, move |result| Event::PhotoCompressed {
                    ticket,
                    result: Box::new(result),
                });
            }

            Command::Classify(photo) => {
                let reply_ticket = ticket.clone();
                let sent = model.api.classify(&caps.http, &photo, move |r| {
                    Event::ClassificationResponse {
                        ticket: reply_ticket,
                        result: Box::new(r),
                    }
                });
                if let Err(e) = sent {
                    error!(error = %e, "cannot build classification request");
                    model.wizard.classification_finished(
                        &ticket,
                        Err(ClassificationError::InvalidResponse {
                            reason: e.to_string(),
                        }),
                    );
                }
            }

            Command::Locate => {
                let operation = GeolocationOperation {
                    options: model.config.geolocation,
                };
                caps.geolocation
                    .locate(operation, move |result| Event::LocationResult { ticket, result });
            }

            Command::ReverseGeocode(fix) => {
                if let Some(address) = model.geocode_cache.get(&fix) {
                    debug!("address served from cache");
                    model.wizard.address_resolved(&fix, address);
                } else if !model.network_online {
                    debug!("offline; address left empty");
                } else {
                    let sent = model.api.geocode(&caps.http, &fix, move |r| {
                        Event::GeocodeResponse {
                            fix,
                            result: Box::new(r),
                        }
                    });
                    if let Err(e) = sent {
                        warn!(error = %e, "cannot build geocode request");
                    }
                }
            }

            Command::CheckDuplicates(request) => {
                if !model.network_online {
                    model
                        .wizard
                        .duplicate_check_finished(&ticket, Err("offline".to_string()));
                    return;
                }
                let reply_ticket = ticket.clone();
                let sent = model.api.check_duplicates(&caps.http, &request, move |r| {
                    Event::DuplicateCheckResponse {
                        ticket: reply_ticket,
                        result: Box::new(r),
                    }
                });
                if let Err(e) = sent {
                    warn!(error = %e, "cannot build duplicate check");
                    model.wizard.duplicate_check_finished(&ticket, Err(e.to_string()));
                }
            }

            Command::Submit(submission) => {
                let reply_ticket = ticket.clone();
                let sent = model.api.create_complaint(&caps.http, &submission, move |r| {
                    Event::SubmitResponse {
                        ticket: reply_ticket,
                        result: Box::new(r),
                    }
                });
                if let Err(e) = sent {
                    error!(error = %e, "cannot build complaint request");
                    let message = AppError::from(e).user_facing_message();
                    model
                        .wizard
                        .submission_finished(&ticket, SubmitOutcome::Failed(message));
                }
            }

            Command::Enqueue(submission) => Self::enqueue(submission, model, caps),
        }
    }

    // --- Draft slot ---

    fn schedule_autosave(model: &mut Model, caps: &Capabilities) {
        let revision = model.wizard.revision();
        if revision == model.scheduled_revision {
            return;
        }
        model.scheduled_revision = revision;
        if model.wizard.step() == WizardStep::Success {
            return;
        }

        model.autosave_generation += 1;
        let generation = model.autosave_generation;
        caps.timer.start(
            TimerOperation {
                id: generation,
                after_ms: model.config.autosave_debounce_ms,
            },
            move |()| Event::AutosaveTimerFired { generation },
        );
    }

    fn persist_draft(model: &Model, caps: &Capabilities) {
        if model.wizard.step() == WizardStep::Success {
            return;
        }
        let saved = SavedDraft {
            draft: model.wizard.draft().clone(),
            description: model.wizard.description().clone(),
            saved_at: model.now,
        };
        if saved.is_blank() {
            caps.kv.delete(KvKey::draft_slot().raw(), |r| {
                Event::DraftPersisted(Box::new(r))
            });
            return;
        }
        match saved.to_bytes() {
            Ok(bytes) => caps.kv.set(KvKey::draft_slot().raw(), bytes, |r| {
                Event::DraftPersisted(Box::new(r))
            }),
            Err(e) => warn!(error = %e, "draft could not be serialized"),
        }
    }

    /// Empties the slot and cancels any autosave still waiting to fire.
    fn clear_draft(model: &mut Model, caps: &Capabilities) {
        model.autosave_generation += 1;
        model.scheduled_revision = model.wizard.revision();
        caps.kv.delete(KvKey::draft_slot().raw(), |r| {
            Event::DraftPersisted(Box::new(r))
        });
    }

    fn handle_draft_loaded(result: KvResult, model: &mut Model, caps: &Capabilities) {
        let bytes = match result {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "draft slot could not be read");
                return;
            }
        };

        match SavedDraft::from_bytes(&bytes) {
            Ok(saved) if saved.is_restorable(model.now, model.config.draft_ttl_ms) => {
                let age_ms = model.now.elapsed_since(saved.saved_at);
                if model.wizard.restore(saved.draft, saved.description) {
                    info!(age_ms, "draft restored");
                    model.show_toast(ToastKind::Info, "We restored your unfinished complaint.");
                } else {
                    debug!("wizard already in use; saved draft left alone");
                }
            }
            Ok(_) => {
                info!("saved draft expired; discarding");
                caps.kv.delete(KvKey::draft_slot().raw(), |r| {
                    Event::DraftPersisted(Box::new(r))
                });
            }
            Err(e) => {
                warn!(error = %e, "saved draft unreadable; discarding");
                caps.kv.delete(KvKey::draft_slot().raw(), |r| {
                    Event::DraftPersisted(Box::new(r))
                });
            }
        }
    }

    // --- Offline queue ---

    fn persist_queue(model: &Model, caps: &Capabilities) {
        if !model.queue_loaded {
            debug!("queue not loaded yet; write deferred");
            return;
        }
        match model.queue.to_bytes() {
            Ok(bytes) => caps.kv.set(KvKey::offline_queue().raw(), bytes, |r| {
                Event::QueuePersisted(Box::new(r))
            }),
            Err(e) => error!(error = %e, "offline queue could not be serialized"),
        }
    }

    /// A value that fails to decode is copied aside before this queue may
    /// overwrite its key. A failed read leaves the queue unloaded, so
    /// nothing is written over what might still be there.
    fn handle_queue_loaded(result: KvResult, model: &mut Model, caps: &Capabilities) {
        if model.queue_loaded {
            debug!("offline queue already loaded");
            return;
        }
        match result {
            Ok(Some(bytes)) => match OfflineQueue::from_bytes(&bytes) {
                Ok(mut loaded) => {
                    let recovered = loaded.recover_interrupted();
                    info!(entries = loaded.len(), recovered, "offline queue loaded");
                    model.queue.merge(loaded);
                    Self::queue_ready(model, caps, recovered > 0);
                }
                Err(e) => {
                    warn!(error = %e, bytes = bytes.len(), "stored offline queue unreadable; setting it aside");
                    caps.kv.set(KvKey::quarantined_queue().raw(), bytes, |r| {
                        Event::QueueQuarantined(Box::new(r))
                    });
                }
            },
            Ok(None) => {
                debug!("no stored offline queue");
                Self::queue_ready(model, caps, false);
            }
            Err(e) => {
                error!(error = %e, "offline queue could not be read; writes deferred");
                let error: AppError = e.into();
                model.show_toast(ToastKind::Error, error.user_facing_message());
                model.active_error = Some(error);
            }
        }
    }

    fn queue_ready(model: &mut Model, caps: &Capabilities, changed: bool) {
        model.queue_loaded = true;
        if changed || !model.queue.is_empty() {
            Self::persist_queue(model, caps);
        }
        if model.network_online {
            Self::sync_queue(model, caps, false);
        }
    }

    /// Refused until the stored queue has been read, so an entry never
    /// races a load that could replace it.
    fn enqueue(submission: ComplaintSubmission, model: &mut Model, caps: &Capabilities) {
        if !model.queue_loaded {
            warn!("complaint not queued: saved complaints not loaded yet");
            model.show_toast(
                ToastKind::Warning,
                "Saved complaints are still loading. Please try again in a moment.",
            );
            return;
        }
        match model.queue.enqueue(submission, model.now) {
            Ok(offline_id) => {
                model.wizard.mark_queued(offline_id);
                Self::persist_queue(model, caps);
                Self::clear_draft(model, caps);
                model.show_toast(
                    ToastKind::Info,
                    "You're offline. Your complaint was saved and will be sent automatically.",
                );
            }
            Err(e) => {
                warn!(error = %e, "complaint could not be queued");
                let error: AppError = e.into();
                model.show_toast(ToastKind::Error, error.user_facing_message());
                model.active_error = Some(error);
            }
        }
    }

    /// Automatic sync respects backoff and attempt limits; manual sync
    /// retries everything pending or failed.
    fn sync_queue(model: &mut Model, caps: &Capabilities, manual: bool) {
        if !model.queue_loaded {
            debug!("sync deferred until the queue is loaded");
            return;
        }
        if !model.network_online {
            if manual {
                model.show_toast(ToastKind::Warning, "You're offline. Try again when connected.");
            }
            return;
        }

        let due = model
            .queue
            .due_for_sync(model.now, &model.config.sync_retry, manual);
        if due.is_empty() {
            if manual {
                model.show_toast(ToastKind::Info, "Nothing waiting to be sent.");
            }
            return;
        }

        info!(count = due.len(), manual, "syncing offline complaints");
        for offline_id in &due {
            Self::deliver(offline_id, model, caps);
        }
        Self::persist_queue(model, caps);
    }

    fn deliver(offline_id: &OfflineId, model: &mut Model, caps: &Capabilities) {
        let now = model.now;
        let policy = model.config.sync_retry;
        let Some(entry) = model.queue.get_mut(offline_id) else {
            return;
        };
        entry.mark_syncing(now);
        let reply_id = offline_id.clone();
        let sent = model.api.create_complaint(&caps.http, &entry.submission, move |r| {
            Event::QueuedSyncResponse {
                offline_id: reply_id,
                result: Box::new(r),
            }
        });
        if let Err(e) = sent {
            error!(%offline_id, error = %e, "cannot build request for queued complaint");
            entry.mark_failed(e.to_string(), now, &policy);
        }
    }

    fn handle_sync_response(
        offline_id: &OfflineId,
        result: HttpOutcome,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let now = model.now;
        let policy = model.config.sync_retry;
        let Some(entry) = model.queue.get_mut(offline_id) else {
            debug!(%offline_id, "sync result for an entry no longer queued");
            return;
        };
        if entry.sync_status != SyncStatus::Syncing {
            debug!(%offline_id, status = entry.sync_status.as_str(), "unexpected sync result");
            return;
        }

        let toast = match ApiClient::parse_create(result) {
            SubmitOutcome::Created(complaint_id) => {
                info!(%offline_id, %complaint_id, "queued complaint delivered");
                let message = format!("Offline complaint delivered. Your complaint ID is {complaint_id}.");
                entry.mark_synced(complaint_id);
                (ToastKind::Success, message)
            }
            SubmitOutcome::Duplicate(candidates) => {
                info!(%offline_id, candidates = candidates.len(), "queued complaint matches an existing one");
                entry.mark_duplicate(candidates, None);
                (
                    ToastKind::Warning,
                    "A queued complaint may duplicate an existing one. Please review it.".to_string(),
                )
            }
            SubmitOutcome::Failed(message) => {
                warn!(%offline_id, attempts = entry.attempts, %message, "queued complaint delivery failed");
                entry.mark_failed(message, now, &policy);
                (
                    ToastKind::Warning,
                    "A queued complaint could not be sent. It will be retried.".to_string(),
                )
            }
        };
        model.show_toast(toast.0, toast.1);
        Self::persist_queue(model, caps);
    }

    // --- View ---

    fn wizard_view(model: &Model) -> WizardView {
        let wizard = &model.wizard;
        let draft = wizard.draft();
        let step = wizard.step();

        let (suggestion, alternatives, classification_error) = match wizard.classification() {
            ClassificationState::Resolved(p) => (
                p.downgraded.then(|| p.server_category.label().to_string()),
                p.alternatives.iter().map(|c| c.label().to_string()).collect(),
                None,
            ),
            ClassificationState::Failed(e) => (None, Vec::new(), Some(e.user_message())),
            ClassificationState::Idle => (None, Vec::new(), None),
        };

        let duplicate_prompt = match wizard.duplicates() {
            DuplicateGate::Blocked(candidates) => candidates.split_first().map(|(first, rest)| {
                DuplicatePromptView {
                    primary: Self::candidate_view(first, model.now),
                    others: rest.iter().map(|c| Self::candidate_view(c, model.now)).collect(),
                }
            }),
            _ => None,
        };

        WizardView {
            step,
            step_title: step.title().to_string(),
            step_number: WizardStep::ALL.iter().position(|s| *s == step).unwrap_or(0) + 1,
            step_count: WizardStep::ALL.len(),
            completed_steps: wizard.completed_steps().iter().copied().collect(),
            busy: wizard.pending(),

            photo_data_uri: draft.photo().map(Photo::data_uri),
            photo_error: wizard.photo_error().map(|e| e.user_message().to_string()),

            categories: Category::ALL.iter().map(|c| c.label().to_string()).collect(),
            category: draft.category().map(|c| c.category().label().to_string()),
            category_overridden: draft.category().is_some_and(|c| c.is_overridden()),
            ai_confidence: draft.category().and_then(|c| c.ai_confidence()),
            low_confidence_suggestion: suggestion,
            alternatives,
            classification_error,
            needs_category_override: wizard.needs_category_override(),
            can_retry_classification: wizard.can_retry_classification(),

            location: draft.location().map(|fix| LocationView {
                latitude: fix.latitude(),
                longitude: fix.longitude(),
                accuracy_text: format!("±{:.0} m", fix.accuracy_m()),
            }),
            address: draft.address().map(str::to_string),
            location_error: wizard.location_error().map(|e| e.user_message().to_string()),
            location_needs_settings: wizard
                .location_error()
                .is_some_and(|e| e.needs_settings_change()),

            description: wizard.description().as_str().to_string(),
            description_remaining: wizard.description().remaining(),

            duplicate_prompt,
            duplicates_unverified: matches!(wizard.duplicates(), DuplicateGate::Unverified),

            submission_error: wizard.submission_error().map(str::to_string),
            can_go_next: wizard.can_go_next(),
            can_submit: wizard.can_submit(),
            outcome: wizard.outcome().cloned(),
        }
    }

    fn candidate_view(candidate: &DuplicateCandidate, now: UnixTimeMs) -> DuplicateCandidateView {
        DuplicateCandidateView {
            complaint_id: candidate.complaint_id.clone(),
            category: candidate.category.clone(),
            distance_text: candidate.distance_text(),
            status: candidate.status.display_name().to_string(),
            address: candidate.address.clone(),
            reported: candidate
                .created_at
                .map(|t| format_time_ago(UnixTimeMs::from(t).as_millis(), now.as_millis())),
        }
    }

    fn queue_view(model: &Model) -> QueueView {
        QueueView {
            items: model
                .queue
                .iter()
                .map(|e| QueueItemView {
                    offline_id: e.offline_id.to_string(),
                    category: e.submission.category.category().label().to_string(),
                    status: e.sync_status.as_str().to_string(),
                    attempts: e.attempts,
                    queued: format_time_ago(e.queued_at.as_millis(), model.now.as_millis()),
                    last_error: e.last_error.clone(),
                    awaiting_confirmation: e.awaiting_confirmation(),
                    complaint_id: e.complaint_id.as_ref().map(ToString::to_string),
                })
                .collect(),
            counts: model.queue.counts(),
        }
    }

    fn tracking_view(model: &Model) -> TrackingPanelView {
        match &model.tracking {
            TrackingState::Idle => TrackingPanelView::default(),
            TrackingState::Loading { .. } => TrackingPanelView {
                loading: true,
                ..TrackingPanelView::default()
            },
            TrackingState::Loaded(record) => TrackingPanelView {
                record: Some(TrackingView::build(record, model.now)),
                ..TrackingPanelView::default()
            },
            TrackingState::Failed(e) => TrackingPanelView {
                error: Some(e.user_facing_message()),
                ..TrackingPanelView::default()
            },
        }
    }
}
