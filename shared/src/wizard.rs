//! The complaint submission wizard.
//!
//! Steps run consent → photo → classify → details → preview → success. The
//! draft is a tagged union, so a complaint without a location cannot even be
//! expressed as submittable. Methods here are pure: they mutate the wizard
//! and hand back the [`Command`] the app layer should turn into an effect.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use crate::category::Category;
use crate::classification::{ClassificationError, Prediction};
use crate::duplicates::{CheckDuplicatesRequest, DuplicateCandidate, DuplicateGate};
use crate::geolocation::{GeoError, GeoFix};
use crate::image_processing::{jpeg_data_uri, CompressedImage, ImageError, ImageSource};
use crate::retry::RetryPolicy;
use crate::{ComplaintId, Description, OfflineId, SessionId, ValidationError, MAX_DESCRIPTION_CHARS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Consent,
    Photo,
    Classify,
    Details,
    Preview,
    Success,
}

impl WizardStep {
    pub const ALL: [Self; 6] = [
        Self::Consent,
        Self::Photo,
        Self::Classify,
        Self::Details,
        Self::Preview,
        Self::Success,
    ];

    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Consent => "Before you start",
            Self::Photo => "Add a photo",
            Self::Classify => "Issue type",
            Self::Details => "Location & details",
            Self::Preview => "Review",
            Self::Success => "Submitted",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    #[serde(with = "serde_bytes")]
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    fingerprint: String,
}

impl Photo {
    pub const MIME_TYPE: &'static str = CompressedImage::MIME_TYPE;
    pub const FILE_NAME: &'static str = "complaint.jpg";

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The displayable form. Derived from the bytes, so the two never drift.
    #[must_use]
    pub fn data_uri(&self) -> String {
        jpeg_data_uri(&self.bytes)
    }
}

impl From<CompressedImage> for Photo {
    fn from(image: CompressedImage) -> Self {
        Self {
            bytes: image.bytes,
            width: image.width,
            height: image.height,
            fingerprint: image.fingerprint,
        }
    }
}

impl fmt::Debug for Photo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Photo")
            .field("len", &self.bytes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// A category the draft is allowed to carry: either a confident AI
/// prediction or an explicit user choice. The catch-all only gets in
/// through the latter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CategoryChoiceRepr", into = "CategoryChoiceRepr")]
pub struct CategoryChoice {
    category: Category,
    ai_confidence: Option<f32>,
    overridden: bool,
}

#[derive(Serialize, Deserialize)]
struct CategoryChoiceRepr {
    category: Category,
    ai_confidence: Option<f32>,
    overridden: bool,
}

impl TryFrom<CategoryChoiceRepr> for CategoryChoice {
    type Error = Blocked;

    fn try_from(repr: CategoryChoiceRepr) -> Result<Self, Self::Error> {
        if repr.overridden {
            Ok(Self::manual(repr.category))
        } else if repr.category.is_catch_all() {
            Err(Blocked::CategoryUnresolved)
        } else {
            Ok(Self {
                category: repr.category,
                ai_confidence: repr.ai_confidence.filter(|c| (0.0..=1.0).contains(c)),
                overridden: false,
            })
        }
    }
}

impl From<CategoryChoice> for CategoryChoiceRepr {
    fn from(choice: CategoryChoice) -> Self {
        Self {
            category: choice.category,
            ai_confidence: choice.ai_confidence,
            overridden: choice.overridden,
        }
    }
}

impl CategoryChoice {
    /// `None` when the prediction landed in the catch-all.
    #[must_use]
    pub fn from_prediction(prediction: &Prediction) -> Option<Self> {
        prediction.is_usable().then(|| Self {
            category: prediction.category,
            ai_confidence: Some(prediction.score),
            overridden: false,
        })
    }

    #[must_use]
    pub const fn manual(category: Category) -> Self {
        Self {
            category,
            ai_confidence: None,
            overridden: true,
        }
    }

    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Present only when the category came from the classifier.
    #[must_use]
    pub const fn ai_confidence(&self) -> Option<f32> {
        self.ai_confidence
    }

    #[must_use]
    pub const fn is_overridden(&self) -> bool {
        self.overridden
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ComplaintDraft {
    #[default]
    Empty,
    WithPhoto {
        photo: Photo,
    },
    WithCategory {
        photo: Photo,
        category: CategoryChoice,
    },
    WithLocation {
        photo: Photo,
        category: CategoryChoice,
        location: GeoFix,
        address: Option<String>,
    },
}

impl ComplaintDraft {
    #[must_use]
    pub const fn photo(&self) -> Option<&Photo> {
        match self {
            Self::Empty => None,
            Self::WithPhoto { photo }
            | Self::WithCategory { photo, .. }
            | Self::WithLocation { photo, .. } => Some(photo),
        }
    }

    #[must_use]
    pub const fn category(&self) -> Option<&CategoryChoice> {
        match self {
            Self::WithCategory { category, .. } | Self::WithLocation { category, .. } => {
                Some(category)
            }
            _ => None,
        }
    }

    #[must_use]
    pub const fn location(&self) -> Option<&GeoFix> {
        match self {
            Self::WithLocation { location, .. } => Some(location),
            _ => None,
        }
    }

    #[must_use]
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::WithLocation { address, .. } => address.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::WithLocation { .. })
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// A new photo invalidates everything derived from the old one.
    pub fn set_photo(&mut self, photo: Photo) {
        *self = Self::WithPhoto { photo };
    }

    pub fn set_category(&mut self, choice: CategoryChoice) -> Result<(), Blocked> {
        let (next, result) = match std::mem::take(self) {
            Self::Empty => (Self::Empty, Err(Blocked::MissingPhoto)),
            Self::WithPhoto { photo } | Self::WithCategory { photo, .. } => (
                Self::WithCategory {
                    photo,
                    category: choice,
                },
                Ok(()),
            ),
            Self::WithLocation {
                photo,
                location,
                address,
                ..
            } => (
                Self::WithLocation {
                    photo,
                    category: choice,
                    location,
                    address,
                },
                Ok(()),
            ),
        };
        *self = next;
        result
    }

    /// A new fix drops the address resolved for the previous one.
    pub fn set_location(&mut self, fix: GeoFix) -> Result<(), Blocked> {
        let (next, result) = match std::mem::take(self) {
            Self::Empty => (Self::Empty, Err(Blocked::MissingPhoto)),
            draft @ Self::WithPhoto { .. } => (draft, Err(Blocked::CategoryUnresolved)),
            Self::WithCategory { photo, category } | Self::WithLocation { photo, category, .. } => (
                Self::WithLocation {
                    photo,
                    category,
                    location: fix,
                    address: None,
                },
                Ok(()),
            ),
        };
        *self = next;
        result
    }

    /// Only lands when the draft still holds the fix the address was
    /// resolved for.
    pub fn set_address(&mut self, fix: &GeoFix, resolved: String) -> bool {
        match self {
            Self::WithLocation {
                location, address, ..
            } if location == fix => {
                *address = Some(resolved);
                true
            }
            _ => false,
        }
    }

    /// Drops every field first captured at or after `target`.
    pub fn truncate_for(&mut self, target: WizardStep) {
        let next = match (target, std::mem::take(self)) {
            (WizardStep::Consent | WizardStep::Photo, _) | (_, Self::Empty) => Self::Empty,
            (WizardStep::Classify, draft) => match draft {
                Self::WithPhoto { photo }
                | Self::WithCategory { photo, .. }
                | Self::WithLocation { photo, .. } => Self::WithPhoto { photo },
                Self::Empty => Self::Empty,
            },
            (WizardStep::Details, Self::WithLocation { photo, category, .. }) => {
                Self::WithCategory { photo, category }
            }
            (_, draft) => draft,
        };
        *self = next;
    }

    /// Where a restored draft picks up after consent.
    #[must_use]
    pub const fn resume_step(&self) -> WizardStep {
        match self {
            Self::Empty | Self::WithPhoto { .. } => WizardStep::Photo,
            Self::WithCategory { .. } | Self::WithLocation { .. } => WizardStep::Details,
        }
    }
}

/// Why an action was refused. These are conditions shown in the UI, not
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Blocked {
    #[error("waiting for {0:?} to finish")]
    Busy(PendingOp),
    #[error("not available on the {0:?} step")]
    WrongStep(WizardStep),
    #[error("a photo is required")]
    MissingPhoto,
    #[error("choose the issue type first")]
    CategoryUnresolved,
    #[error("a location is required")]
    MissingLocation,
    #[error("confirm this is not a duplicate first")]
    DuplicateUnconfirmed,
    #[error("no duplicate prompt is open")]
    NoDuplicatePrompt,
    #[error("no more automatic attempts; pick a category yourself")]
    RetriesExhausted,
    #[error("description is too long ({len} > {max} characters)")]
    DescriptionTooLong { len: usize, max: usize },
    #[error("cannot go back from {from:?} to {to:?}")]
    InvalidBackTarget { from: WizardStep, to: WizardStep },
}

/// The side effect the wizard is waiting on. Forward navigation is closed
/// while one is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOp {
    Compression,
    Classification,
    Geolocation,
    DuplicateCheck,
    Submission,
}

/// Identifies the wizard session and navigation epoch a result belongs to.
/// Results carrying an old ticket are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket {
    pub session: SessionId,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Compress(ImageSource),
    Classify(Photo),
    Locate,
    ReverseGeocode(GeoFix),
    CheckDuplicates(CheckDuplicatesRequest),
    Submit(ComplaintSubmission),
    Enqueue(ComplaintSubmission),
}

pub type StepResult = Result<Option<Command>, Blocked>;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ClassificationState {
    #[default]
    Idle,
    Resolved(Prediction),
    Failed(ClassificationError),
}

/// What the create call came back with, as the wizard needs it.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Created(ComplaintId),
    /// The server found a match itself (409).
    Duplicate(Vec<DuplicateCandidate>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Submitted { complaint_id: ComplaintId },
    Queued { offline_id: OfflineId },
}

/// A draft that passed every gate. The only input a create request is
/// built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyDraft {
    photo: Photo,
    category: CategoryChoice,
    location: GeoFix,
    address: Option<String>,
    description: Description,
    confirm_not_duplicate: bool,
}

impl ReadyDraft {
    pub fn new(
        draft: &ComplaintDraft,
        description: &Description,
        gate: &DuplicateGate,
    ) -> Result<Self, Blocked> {
        let ComplaintDraft::WithLocation {
            photo,
            category,
            location,
            address,
        } = draft
        else {
            return Err(match draft {
                ComplaintDraft::Empty => Blocked::MissingPhoto,
                ComplaintDraft::WithPhoto { .. } => Blocked::CategoryUnresolved,
                _ => Blocked::MissingLocation,
            });
        };

        if !gate.allows_submit() {
            return Err(Blocked::DuplicateUnconfirmed);
        }

        Ok(Self {
            photo: photo.clone(),
            category: category.clone(),
            location: *location,
            address: address.clone(),
            description: description.clone(),
            confirm_not_duplicate: gate.confirm_not_duplicate(),
        })
    }

    #[must_use]
    pub fn into_submission(self, session_id: SessionId, preferred_language: &str) -> ComplaintSubmission {
        ComplaintSubmission {
            session_id,
            photo: self.photo,
            category: self.category,
            location: self.location,
            address: self.address,
            description: self.description,
            preferred_language: preferred_language.to_string(),
            confirm_not_duplicate: self.confirm_not_duplicate,
        }
    }
}

/// Everything `POST /complaints` needs, frozen at submit time. Also what
/// the offline queue stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplaintSubmission {
    pub session_id: SessionId,
    pub photo: Photo,
    pub category: CategoryChoice,
    pub location: GeoFix,
    pub address: Option<String>,
    pub description: Description,
    pub preferred_language: String,
    pub confirm_not_duplicate: bool,
}

#[derive(Debug)]
pub struct Wizard {
    session_id: SessionId,
    epoch: u64,
    revision: u64,
    step: WizardStep,
    completed: BTreeSet<WizardStep>,
    draft: ComplaintDraft,
    description: Description,
    pending: Option<PendingOp>,
    retry: RetryPolicy,
    photo_error: Option<ImageError>,
    classification: ClassificationState,
    classification_attempts: u32,
    predictions: HashMap<String, Prediction>,
    location_error: Option<GeoError>,
    location_attempts: u32,
    duplicates: DuplicateGate,
    submission_error: Option<String>,
    outcome: Option<Outcome>,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new(SessionId::generate(), RetryPolicy::user_initiated())
    }
}

impl Wizard {
    #[must_use]
    pub fn new(session_id: SessionId, retry: RetryPolicy) -> Self {
        Self {
            session_id,
            epoch: 0,
            revision: 0,
            step: WizardStep::Consent,
            completed: BTreeSet::new(),
            draft: ComplaintDraft::Empty,
            description: Description::default(),
            pending: None,
            retry,
            photo_error: None,
            classification: ClassificationState::Idle,
            classification_attempts: 0,
            predictions: HashMap::new(),
            location_error: None,
            location_attempts: 0,
            duplicates: DuplicateGate::Unchecked,
            submission_error: None,
            outcome: None,
        }
    }

    /// Abandons this session. Anything still in flight is ignored when it
    /// lands.
    pub fn reset(&mut self) {
        let revision = self.revision + 1;
        *self = Self::new(SessionId::generate(), self.retry);
        self.revision = revision;
        info!(session = %self.session_id, "wizard reset");
    }

    /// Puts a saved draft back. Only before the user has started.
    pub fn restore(&mut self, draft: ComplaintDraft, description: Description) -> bool {
        if self.step != WizardStep::Consent || !self.draft.is_empty() {
            return false;
        }
        self.draft = draft;
        self.description = description;
        true
    }

    // --- accessors ---

    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn ticket(&self) -> Ticket {
        Ticket {
            session: self.session_id.clone(),
            epoch: self.epoch,
        }
    }

    /// Bumped on every change worth autosaving.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub const fn step(&self) -> WizardStep {
        self.step
    }

    #[must_use]
    pub const fn completed_steps(&self) -> &BTreeSet<WizardStep> {
        &self.completed
    }

    #[must_use]
    pub const fn draft(&self) -> &ComplaintDraft {
        &self.draft
    }

    #[must_use]
    pub const fn description(&self) -> &Description {
        &self.description
    }

    #[must_use]
    pub const fn pending(&self) -> Option<PendingOp> {
        self.pending
    }

    #[must_use]
    pub const fn photo_error(&self) -> Option<&ImageError> {
        self.photo_error.as_ref()
    }

    #[must_use]
    pub const fn classification(&self) -> &ClassificationState {
        &self.classification
    }

    #[must_use]
    pub const fn classification_attempts(&self) -> u32 {
        self.classification_attempts
    }

    #[must_use]
    pub const fn location_error(&self) -> Option<GeoError> {
        self.location_error
    }

    #[must_use]
    pub const fn location_attempts(&self) -> u32 {
        self.location_attempts
    }

    #[must_use]
    pub const fn duplicates(&self) -> &DuplicateGate {
        &self.duplicates
    }

    #[must_use]
    pub fn submission_error(&self) -> Option<&str> {
        self.submission_error.as_deref()
    }

    #[must_use]
    pub const fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn can_retry_classification(&self) -> bool {
        self.step == WizardStep::Classify
            && !self.is_busy()
            && self.draft.photo().is_some()
            && self.retry.can_retry(self.classification_attempts)
    }

    /// The classifier gave nothing usable, so the user has to choose.
    #[must_use]
    pub fn needs_category_override(&self) -> bool {
        self.step == WizardStep::Classify
            && !self.is_busy()
            && self.draft.category().is_none()
            && match &self.classification {
                ClassificationState::Resolved(p) => !p.is_usable(),
                ClassificationState::Failed(_) => true,
                ClassificationState::Idle => self.classification_attempts > 0,
            }
    }

    #[must_use]
    pub fn can_go_next(&self) -> bool {
        if self.is_busy() || self.duplicates.is_blocking() {
            return false;
        }
        match self.step {
            WizardStep::Consent => true,
            WizardStep::Photo => self.draft.photo().is_some(),
            WizardStep::Classify => self.draft.category().is_some(),
            WizardStep::Details => self.draft.location().is_some(),
            WizardStep::Preview => self.can_submit(),
            WizardStep::Success => false,
        }
    }

    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.step == WizardStep::Preview
            && !self.is_busy()
            && ReadyDraft::new(&self.draft, &self.description, &self.duplicates).is_ok()
    }

    // --- guards ---

    fn ensure_step(&self, step: WizardStep) -> Result<(), Blocked> {
        if self.step == step {
            Ok(())
        } else {
            Err(Blocked::WrongStep(self.step))
        }
    }

    fn ensure_idle(&self) -> Result<(), Blocked> {
        match self.pending {
            Some(op) => Err(Blocked::Busy(op)),
            None => Ok(()),
        }
    }

    /// Accepts a result only for the current session and epoch, and only
    /// if that operation is the one outstanding.
    fn settle(&mut self, ticket: &Ticket, op: PendingOp) -> bool {
        if ticket.session != self.session_id || ticket.epoch != self.epoch {
            debug!(?op, "dropping result from an abandoned session or step");
            return false;
        }
        if self.pending != Some(op) {
            debug!(?op, pending = ?self.pending, "dropping unexpected result");
            return false;
        }
        self.pending = None;
        true
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn advance(&mut self, to: WizardStep) {
        self.completed.insert(self.step);
        info!(from = ?self.step, to = ?to, "wizard step");
        self.step = to;
    }

    // --- consent ---

    pub fn accept_consent(&mut self) -> StepResult {
        self.ensure_step(WizardStep::Consent)?;
        let target = self.draft.resume_step();
        self.completed.extend(WizardStep::ALL.into_iter().filter(|s| *s < target));
        info!(to = ?target, restored = !self.draft.is_empty(), "consent accepted");
        self.step = target;
        Ok(self.enter_details())
    }

    // --- photo ---

    pub fn select_photo(&mut self, source: ImageSource) -> StepResult {
        self.ensure_step(WizardStep::Photo)?;
        self.ensure_idle()?;
        self.photo_error = None;
        self.pending = Some(PendingOp::Compression);
        Ok(Some(Command::Compress(source)))
    }

    pub fn photo_processed(&mut self, ticket: &Ticket, result: Result<CompressedImage, ImageError>) {
        if !self.settle(ticket, PendingOp::Compression) {
            return;
        }
        match result {
            Ok(image) => {
                self.draft.set_photo(Photo::from(image));
                self.classification = ClassificationState::Idle;
                self.classification_attempts = 0;
                self.touch();
            }
            Err(e) => self.photo_error = Some(e),
        }
    }

    // --- classify ---

    pub fn proceed_to_classify(&mut self) -> StepResult {
        self.ensure_step(WizardStep::Photo)?;
        self.ensure_idle()?;
        let photo = self.draft.photo().ok_or(Blocked::MissingPhoto)?.clone();
        self.advance(WizardStep::Classify);

        if let Some(prediction) = self.predictions.get(photo.fingerprint()).cloned() {
            debug!(fingerprint = photo.fingerprint(), "reusing prediction for this photo");
            self.apply_prediction(prediction);
            return Ok(None);
        }
        Ok(Some(self.start_classification(photo)))
    }

    pub fn retry_classification(&mut self) -> StepResult {
        self.ensure_step(WizardStep::Classify)?;
        self.ensure_idle()?;
        let photo = self.draft.photo().ok_or(Blocked::MissingPhoto)?.clone();
        if !self.retry.can_retry(self.classification_attempts) {
            return Err(Blocked::RetriesExhausted);
        }
        Ok(Some(self.start_classification(photo)))
    }

    fn start_classification(&mut self, photo: Photo) -> Command {
        self.classification_attempts += 1;
        self.classification = ClassificationState::Idle;
        self.pending = Some(PendingOp::Classification);
        Command::Classify(photo)
    }

    pub fn classification_finished(
        &mut self,
        ticket: &Ticket,
        result: Result<Prediction, ClassificationError>,
    ) {
        if !self.settle(ticket, PendingOp::Classification) {
            return;
        }
        match result {
            Ok(prediction) => {
                if let Some(photo) = self.draft.photo() {
                    self.predictions
                        .insert(photo.fingerprint().to_string(), prediction.clone());
                }
                self.apply_prediction(prediction);
            }
            Err(e) => self.classification = ClassificationState::Failed(e),
        }
    }

    fn apply_prediction(&mut self, prediction: Prediction) {
        if let Some(choice) = CategoryChoice::from_prediction(&prediction) {
            if self.draft.set_category(choice).is_ok() {
                self.touch();
            }
        }
        self.classification = ClassificationState::Resolved(prediction);
    }

    pub fn override_category(&mut self, category: Category) -> Result<(), Blocked> {
        self.ensure_step(WizardStep::Classify)?;
        self.ensure_idle()?;
        self.draft.set_category(CategoryChoice::manual(category))?;
        self.touch();
        Ok(())
    }

    // --- details ---

    pub fn proceed_to_details(&mut self) -> StepResult {
        self.ensure_step(WizardStep::Classify)?;
        self.ensure_idle()?;
        if self.draft.photo().is_none() {
            return Err(Blocked::MissingPhoto);
        }
        if self.draft.category().is_none() {
            return Err(Blocked::CategoryUnresolved);
        }
        self.advance(WizardStep::Details);
        Ok(self.enter_details())
    }

    fn enter_details(&mut self) -> Option<Command> {
        if self.step != WizardStep::Details || self.draft.location().is_some() {
            return None;
        }
        Some(self.start_geolocation())
    }

    pub fn refresh_location(&mut self) -> StepResult {
        self.ensure_step(WizardStep::Details)?;
        self.ensure_idle()?;
        Ok(Some(self.start_geolocation()))
    }

    fn start_geolocation(&mut self) -> Command {
        self.location_attempts += 1;
        self.location_error = None;
        self.pending = Some(PendingOp::Geolocation);
        Command::Locate
    }

    /// Returns the reverse-geocode to run for a fresh fix.
    pub fn location_finished(
        &mut self,
        ticket: &Ticket,
        result: Result<GeoFix, GeoError>,
    ) -> Option<Command> {
        if !self.settle(ticket, PendingOp::Geolocation) {
            return None;
        }
        match result {
            Ok(fix) => {
                if let Err(blocked) = self.draft.set_location(fix) {
                    debug!(%blocked, "location arrived for a draft without a category");
                    return None;
                }
                self.duplicates = DuplicateGate::Unchecked;
                self.touch();
                Some(Command::ReverseGeocode(fix))
            }
            Err(e) => {
                self.location_error = Some(e);
                None
            }
        }
    }

    pub fn address_resolved(&mut self, fix: &GeoFix, address: String) {
        if self.draft.set_address(fix, address) {
            self.touch();
        }
    }

    pub fn set_description(&mut self, text: &str) -> Result<(), Blocked> {
        self.ensure_step(WizardStep::Details)?;
        let description = Description::new(text).map_err(|e| match e {
            ValidationError::TooLong { len, max } => Blocked::DescriptionTooLong { len, max },
            ValidationError::Empty => Blocked::DescriptionTooLong {
                len: 0,
                max: MAX_DESCRIPTION_CHARS,
            },
        })?;
        if description != self.description {
            self.description = description;
            self.touch();
        }
        Ok(())
    }

    // --- preview ---

    pub fn proceed_to_preview(&mut self) -> StepResult {
        self.ensure_step(WizardStep::Details)?;
        self.ensure_idle()?;
        if self.duplicates.is_blocking() {
            return Err(Blocked::DuplicateUnconfirmed);
        }
        let (Some(location), Some(category)) = (self.draft.location(), self.draft.category())
        else {
            return Err(Blocked::MissingLocation);
        };
        let request = CheckDuplicatesRequest::new(location, category.category());
        self.duplicates = DuplicateGate::Checking;
        self.pending = Some(PendingOp::DuplicateCheck);
        Ok(Some(Command::CheckDuplicates(request)))
    }

    /// `Err` means the check itself could not run.
    pub fn duplicate_check_finished(
        &mut self,
        ticket: &Ticket,
        result: Result<Vec<DuplicateCandidate>, String>,
    ) {
        if !self.settle(ticket, PendingOp::DuplicateCheck) {
            return;
        }
        match result {
            Ok(candidates) => {
                self.duplicates = DuplicateGate::from_candidates(candidates);
                if !self.duplicates.is_blocking() {
                    self.advance(WizardStep::Preview);
                }
            }
            Err(reason) => {
                debug!(%reason, "duplicate check unavailable; continuing unverified");
                self.duplicates = DuplicateGate::Unverified;
                self.advance(WizardStep::Preview);
            }
        }
    }

    /// Closes the duplicate prompt and sends the user back to details.
    pub fn dismiss_duplicates(&mut self) -> Result<(), Blocked> {
        if !self.duplicates.is_blocking() {
            return Err(Blocked::NoDuplicatePrompt);
        }
        self.duplicates = DuplicateGate::Unchecked;
        if self.step == WizardStep::Preview {
            self.completed.remove(&WizardStep::Details);
            self.completed.remove(&WizardStep::Preview);
            self.step = WizardStep::Details;
        }
        self.submission_error = None;
        Ok(())
    }

    /// "Not a duplicate". From details this moves on to preview; after a
    /// conflict on create it resubmits straight away.
    pub fn confirm_not_duplicate(&mut self, online: bool, language: &str) -> StepResult {
        self.ensure_idle()?;
        if !self.duplicates.confirm() {
            return Err(Blocked::NoDuplicatePrompt);
        }
        info!(candidates = self.duplicates.candidates().len(), "user confirmed not a duplicate");
        match self.step {
            WizardStep::Details => {
                self.advance(WizardStep::Preview);
                Ok(None)
            }
            WizardStep::Preview => self.submit(online, language),
            other => Err(Blocked::WrongStep(other)),
        }
    }

    // --- submit ---

    pub fn submit(&mut self, online: bool, language: &str) -> StepResult {
        self.ensure_step(WizardStep::Preview)?;
        self.ensure_idle()?;
        let ready = ReadyDraft::new(&self.draft, &self.description, &self.duplicates)?;
        let submission = ready.into_submission(self.session_id.clone(), language);
        self.submission_error = None;

        if online {
            self.pending = Some(PendingOp::Submission);
            Ok(Some(Command::Submit(submission)))
        } else {
            Ok(Some(Command::Enqueue(submission)))
        }
    }

    pub fn submission_finished(&mut self, ticket: &Ticket, outcome: SubmitOutcome) {
        if !self.settle(ticket, PendingOp::Submission) {
            return;
        }
        match outcome {
            SubmitOutcome::Created(complaint_id) => {
                info!(%complaint_id, "complaint submitted");
                self.outcome = Some(Outcome::Submitted { complaint_id });
                self.advance(WizardStep::Success);
            }
            SubmitOutcome::Duplicate(candidates) => {
                self.duplicates = DuplicateGate::Blocked(candidates);
            }
            SubmitOutcome::Failed(message) => {
                self.submission_error = Some(message);
            }
        }
    }

    pub fn mark_queued(&mut self, offline_id: OfflineId) {
        if self.step != WizardStep::Preview {
            return;
        }
        info!(%offline_id, "complaint queued for later delivery");
        self.outcome = Some(Outcome::Queued { offline_id });
        self.advance(WizardStep::Success);
    }

    // --- back ---

    /// Returns to an earlier step, discarding what was captured from that
    /// step on. Consent is never re-entered and success is final.
    pub fn go_back(&mut self, target: WizardStep) -> StepResult {
        if self.step == WizardStep::Success || target == WizardStep::Consent || target >= self.step {
            return Err(Blocked::InvalidBackTarget {
                from: self.step,
                to: target,
            });
        }
        // The server may already hold the complaint; its reply must land.
        if self.pending == Some(PendingOp::Submission) {
            return Err(Blocked::Busy(PendingOp::Submission));
        }

        self.epoch += 1;
        self.pending = None;
        self.draft.truncate_for(target);
        self.duplicates = DuplicateGate::Unchecked;
        self.submission_error = None;

        if target <= WizardStep::Details {
            self.description = Description::default();
            self.location_error = None;
            self.location_attempts = 0;
        }
        if target <= WizardStep::Classify {
            self.classification = ClassificationState::Idle;
            self.classification_attempts = 0;
        }
        if target <= WizardStep::Photo {
            self.photo_error = None;
        }

        self.completed.retain(|s| *s < target);
        info!(from = ?self.step, to = ?target, "wizard back");
        self.step = target;
        self.touch();
        Ok(self.enter_details())
    }
}
