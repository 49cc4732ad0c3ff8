//! Grievance REST endpoints: requests sent through the HTTP capability and
//! interpretation of what comes back.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::capabilities::{
    outcome, AppHttp, FormPart, HttpError, HttpOutcome, MultipartForm, ValidatedUrl,
    TIMEOUT_HEADER,
};
use crate::classification::{ClassificationError, ClassifyResponse, ConfidenceThreshold, Prediction};
use crate::duplicates::{CheckDuplicatesRequest, DuplicateCandidate, DuplicateReport};
use crate::event::Event;
use crate::geolocation::GeoFix;
use crate::tracking::ComplaintRecord;
use crate::wizard::{ComplaintSubmission, Photo, SubmitOutcome};
use crate::{
    server_message, AppError, ComplaintId, ErrorKind, CLASSIFY_TIMEOUT, CREATE_COMPLAINT_TIMEOUT,
    DUPLICATE_CHECK_TIMEOUT, GEOCODE_TIMEOUT, STATUS_TIMEOUT,
};

const MAX_COMPLAINT_ID_LEN: usize = 64;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("invalid complaint id")]
    InvalidComplaintId,

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response: {reason}")]
    InvalidResponse { reason: String },
}

impl ApiError {
    fn from_response(status: u16, body: &[u8]) -> Self {
        Self::Status {
            status,
            message: server_message(body).unwrap_or_else(|| format!("HTTP error: {status}")),
        }
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Http(http) => http.into(),
            ApiError::InvalidComplaintId => {
                AppError::new(ErrorKind::Validation, "Please enter a valid complaint ID")
            }
            ApiError::Status { status, message } => {
                let mut error = AppError::from_http_status(status, None);
                error.message = message;
                error
            }
            ApiError::InvalidResponse { reason } => {
                AppError::new(ErrorKind::Deserialization, "Unexpected response from the server")
                    .with_internal(reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiClient {
    base: ValidatedUrl,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self {
            base: ValidatedUrl::localhost(),
        }
    }
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            base: ValidatedUrl::new(base_url)?,
        })
    }

    #[must_use]
    pub const fn base_url(&self) -> &ValidatedUrl {
        &self.base
    }

    fn url(&self, path: &str) -> Result<ValidatedUrl, ApiError> {
        Ok(self.base.join_path(path)?)
    }

    // --- requests ---

    pub fn classify<F>(&self, http: &AppHttp, photo: &Photo, make_event: F) -> Result<(), ApiError>
    where
        F: FnOnce(HttpOutcome) -> Event + Send + Sync + 'static,
    {
        let url = self.url("complaints/classify")?;
        let form = MultipartForm::new(vec![photo_part(photo)]);
        send_form(http, &url, &form, CLASSIFY_TIMEOUT, make_event)
    }

    pub fn check_duplicates<F>(
        &self,
        http: &AppHttp,
        request: &CheckDuplicatesRequest,
        make_event: F,
    ) -> Result<(), ApiError>
    where
        F: FnOnce(HttpOutcome) -> Event + Send + Sync + 'static,
    {
        let url = self.url("complaints/check-duplicates")?;
        let builder = http
            .post(url.as_str())
            .body_json(request)
            .map_err(|e| HttpError::Serialization {
                message: e.to_string(),
            })?;
        send(builder, DUPLICATE_CHECK_TIMEOUT, make_event);
        Ok(())
    }

    pub fn geocode<F>(&self, http: &AppHttp, fix: &GeoFix, make_event: F) -> Result<(), ApiError>
    where
        F: FnOnce(HttpOutcome) -> Event + Send + Sync + 'static,
    {
        let url = self.url("complaints/geocode")?.with_query(&[
            ("latitude", fix.latitude().to_string()),
            ("longitude", fix.longitude().to_string()),
        ])?;
        send(http.get(url.as_str()), GEOCODE_TIMEOUT, make_event);
        Ok(())
    }

    pub fn create_complaint<F>(
        &self,
        http: &AppHttp,
        submission: &ComplaintSubmission,
        make_event: F,
    ) -> Result<(), ApiError>
    where
        F: FnOnce(HttpOutcome) -> Event + Send + Sync + 'static,
    {
        let url = self.url("complaints")?;
        let form = MultipartForm::new(complaint_parts(submission));
        send_form(http, &url, &form, CREATE_COMPLAINT_TIMEOUT, make_event)
    }

    pub fn complaint_status<F>(
        &self,
        http: &AppHttp,
        complaint_id: &str,
        make_event: F,
    ) -> Result<(), ApiError>
    where
        F: FnOnce(HttpOutcome) -> Event + Send + Sync + 'static,
    {
        let id = valid_complaint_id(complaint_id)?;
        let url = self.url(&format!("complaints/status/{id}"))?;
        send(http.get(url.as_str()), STATUS_TIMEOUT, make_event);
        Ok(())
    }

    // --- parsers ---

    /// Applies the confidence threshold: a score below it lands in the
    /// catch-all whatever the server called it.
    pub fn parse_classification(
        result: HttpOutcome,
        threshold: ConfidenceThreshold,
    ) -> Result<Prediction, ClassificationError> {
        let response = result.map_err(|e| match e {
            HttpError::Timeout => ClassificationError::Timeout,
            other => ClassificationError::Network {
                message: other.to_string(),
            },
        })?;

        if !response.is_success() {
            return Err(ClassificationError::Server {
                status: response.status,
                message: server_message(&response.body)
                    .unwrap_or_else(|| "Classification failed".to_string()),
            });
        }

        let body: ClassifyResponse =
            response
                .body_json()
                .map_err(|e| ClassificationError::InvalidResponse {
                    reason: e.to_string(),
                })?;
        Ok(Prediction::from_response(&body, threshold))
    }

    pub fn parse_duplicates(result: HttpOutcome) -> Result<Vec<DuplicateCandidate>, ApiError> {
        let response = result?;
        if !response.is_success() {
            return Err(ApiError::from_response(response.status, &response.body));
        }
        let report: DuplicateReport = response.body_json()?;
        Ok(report.into_candidates())
    }

    pub fn parse_geocode(result: HttpOutcome) -> Result<String, ApiError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct GeocodeResponse {
            #[serde(default)]
            formatted_address: Option<String>,
            #[serde(default)]
            address: Option<String>,
        }

        let response = result?;
        if !response.is_success() {
            return Err(ApiError::from_response(response.status, &response.body));
        }
        let body: GeocodeResponse = response.body_json()?;
        body.formatted_address
            .into_iter()
            .chain(body.address)
            .map(|a| a.trim().to_string())
            .find(|a| !a.is_empty())
            .ok_or_else(|| ApiError::InvalidResponse {
                reason: "no address in geocode response".into(),
            })
    }

    /// 2xx with an id is a success, 409 with candidates is a duplicate,
    /// anything else a failure with a message fit for the user.
    #[must_use]
    pub fn parse_create(result: HttpOutcome) -> SubmitOutcome {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Created {
            #[serde(alias = "_id")]
            complaint_id: String,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum CreateResponse {
            Wrapped { data: Created },
            Bare(Created),
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => return SubmitOutcome::Failed(AppError::from(e).user_facing_message()),
        };

        if response.status == 409 {
            let report: DuplicateReport = response.body_json().unwrap_or_default();
            let message = report.message.clone();
            let candidates = report.into_candidates();
            if !candidates.is_empty() {
                return SubmitOutcome::Duplicate(candidates);
            }
            return SubmitOutcome::Failed(message.unwrap_or_else(|| {
                AppError::new(ErrorKind::Conflict, "").user_facing_message()
            }));
        }

        if !response.is_success() {
            let error = AppError::from_http_status(response.status, Some(&response.body));
            return SubmitOutcome::Failed(error.user_facing_message());
        }

        match response.body_json::<CreateResponse>() {
            Ok(CreateResponse::Wrapped { data: created } | CreateResponse::Bare(created))
                if !created.complaint_id.trim().is_empty() =>
            {
                SubmitOutcome::Created(ComplaintId::new(created.complaint_id))
            }
            _ => SubmitOutcome::Failed(
                AppError::new(ErrorKind::Deserialization, "").user_facing_message(),
            ),
        }
    }

    pub fn parse_status(result: HttpOutcome) -> Result<ComplaintRecord, ApiError> {
        let response = result?;
        if !response.is_success() {
            return Err(ApiError::from_response(response.status, &response.body));
        }
        ComplaintRecord::from_json(&response.body).map_err(|e| ApiError::InvalidResponse {
            reason: e.to_string(),
        })
    }
}

fn send<F>(builder: crux_http::RequestBuilder<Event>, timeout: Duration, make_event: F)
where
    F: FnOnce(HttpOutcome) -> Event + Send + Sync + 'static,
{
    builder
        .header(TIMEOUT_HEADER, timeout.as_millis().to_string())
        .send(move |result| make_event(outcome(result)));
}

fn send_form<F>(
    http: &AppHttp,
    url: &ValidatedUrl,
    form: &MultipartForm,
    timeout: Duration,
    make_event: F,
) -> Result<(), ApiError>
where
    F: FnOnce(HttpOutcome) -> Event + Send + Sync + 'static,
{
    let body = form.encode()?;
    let builder = http
        .post(url.as_str())
        .body_bytes(body)
        .header("Content-Type", form.content_type());
    send(builder, timeout, make_event);
    Ok(())
}

fn valid_complaint_id(complaint_id: &str) -> Result<&str, ApiError> {
    let id = complaint_id.trim();
    let valid = !id.is_empty()
        && id.len() <= MAX_COMPLAINT_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(ApiError::InvalidComplaintId)
    }
}

fn photo_part(photo: &Photo) -> FormPart {
    FormPart::file("image", Photo::FILE_NAME, Photo::MIME_TYPE, photo.bytes().to_vec())
}

fn complaint_parts(submission: &ComplaintSubmission) -> Vec<FormPart> {
    let mut parts = vec![
        photo_part(&submission.photo),
        FormPart::text("category", submission.category.category().label()),
        FormPart::text("description", submission.description.as_str()),
        FormPart::text("latitude", submission.location.latitude().to_string()),
        FormPart::text("longitude", submission.location.longitude().to_string()),
        FormPart::text("preferredLanguage", submission.preferred_language.as_str()),
        FormPart::text("sessionId", submission.session_id.as_str()),
    ];
    if let Some(address) = submission.address.as_deref().filter(|a| !a.trim().is_empty()) {
        parts.push(FormPart::text("address", address));
    }
    if let Some(confidence) = submission.category.ai_confidence() {
        parts.push(FormPart::text("aiConfidence", confidence.to_string()));
    }
    if submission.confirm_not_duplicate {
        parts.push(FormPart::text("confirmNotDuplicate", "true"));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{FormValue, HttpReply};
    use crate::category::Category;
    use crate::testing::fixtures;
    use serde_json::json;

    fn text(parts: &[FormPart], name: &str) -> Option<String> {
        parts.iter().find_map(|p| match &p.value {
            FormValue::Text(t) if p.name == name => Some(t.clone()),
            _ => None,
        })
    }

    #[test]
    fn complaint_form_carries_every_field() {
        let mut submission = fixtures::submission();
        submission.confirm_not_duplicate = true;
        let parts = complaint_parts(&submission);

        assert_eq!(text(&parts, "category").as_deref(), Some("Street Light Issue"));
        assert_eq!(text(&parts, "latitude").as_deref(), Some("12.9716"));
        assert_eq!(text(&parts, "longitude").as_deref(), Some("77.5946"));
        assert_eq!(text(&parts, "preferredLanguage").as_deref(), Some("en"));
        assert_eq!(text(&parts, "address").as_deref(), Some("MG Road, Bengaluru"));
        assert_eq!(text(&parts, "aiConfidence").as_deref(), Some("0.9"));
        assert_eq!(text(&parts, "confirmNotDuplicate").as_deref(), Some("true"));
        assert_eq!(text(&parts, "sessionId").as_deref(), Some(submission.session_id.as_str()));
        assert!(parts.iter().any(|p| p.name == "image"
            && matches!(&p.value, FormValue::File { mime_type, .. } if mime_type == "image/jpeg")));
    }

    #[test]
    fn complaint_form_omits_optional_fields() {
        let mut submission = fixtures::submission();
        submission.address = None;
        submission.category = crate::wizard::CategoryChoice::manual(Category::Other);
        let parts = complaint_parts(&submission);
        assert_eq!(text(&parts, "address"), None);
        assert_eq!(text(&parts, "aiConfidence"), None);
        assert_eq!(text(&parts, "confirmNotDuplicate"), None);
        assert_eq!(text(&parts, "category").as_deref(), Some("Other"));
    }

    #[test]
    fn status_rejects_path_tricks() {
        assert_eq!(valid_complaint_id(" GRV-2026-0001 "), Ok("GRV-2026-0001"));
        assert_eq!(valid_complaint_id("../admin"), Err(ApiError::InvalidComplaintId));
        assert_eq!(valid_complaint_id("  "), Err(ApiError::InvalidComplaintId));
    }

    #[test]
    fn default_client_targets_local_api() {
        assert_eq!(ApiClient::default().base_url().as_str(), "http://localhost:5000/api");
    }

    #[test]
    fn low_confidence_is_downgraded() {
        let body = json!({"category": "Street Light Issue", "confidence": "low", "raw_label": "street_light"});
        let prediction = ApiClient::parse_classification(
            Ok(HttpReply::json(200, &body)),
            ConfidenceThreshold::default(),
        )
        .unwrap();
        assert_eq!(prediction.category, Category::Other);
        assert_eq!(prediction.server_category, Category::StreetLight);
        assert!(prediction.downgraded);
    }

    #[test]
    fn classification_errors_are_typed() {
        let timeout = ApiClient::parse_classification(
            Err(HttpError::Timeout),
            ConfidenceThreshold::default(),
        );
        assert_eq!(timeout, Err(ClassificationError::Timeout));

        let server = ApiClient::parse_classification(
            Ok(HttpReply::json(503, &json!({"detail": "Model not loaded"}))),
            ConfidenceThreshold::default(),
        );
        assert_eq!(
            server,
            Err(ClassificationError::Server {
                status: 503,
                message: "Model not loaded".into()
            })
        );

        let generic = ApiClient::parse_classification(
            Ok(HttpReply::new(500, "oops")),
            ConfidenceThreshold::default(),
        );
        assert!(matches!(generic, Err(ClassificationError::Server { message, .. }) if message == "Classification failed"));
    }

    #[test]
    fn created_complaint_id_is_read() {
        let outcome = ApiClient::parse_create(Ok(HttpReply::json(
            201,
            &json!({"success": true, "data": {"complaintId": "GRV-77"}}),
        )));
        assert_eq!(outcome, SubmitOutcome::Created(ComplaintId::new("GRV-77")));
    }

    #[test]
    fn conflict_returns_candidates() {
        let outcome = ApiClient::parse_create(Ok(HttpReply::json(
            409,
            &json!({
                "isDuplicate": true,
                "message": "Similar complaint exists",
                "duplicates": [{"complaintId": "GRV-5", "distanceMeters": 12, "status": "pending"}]
            }),
        )));
        let SubmitOutcome::Duplicate(candidates) = outcome else {
            panic!("expected duplicate");
        };
        assert_eq!(candidates[0].complaint_id, "GRV-5");
    }

    #[test]
    fn create_failures_carry_a_message() {
        let SubmitOutcome::Failed(msg) = ApiClient::parse_create(Ok(HttpReply::json(
            400,
            &json!({"message": "Description contains invalid characters"}),
        ))) else {
            panic!("expected failure");
        };
        assert_eq!(msg, "Description contains invalid characters");

        assert!(matches!(
            ApiClient::parse_create(Err(HttpError::Connection { message: "reset".into() })),
            SubmitOutcome::Failed(_)
        ));
        assert!(matches!(
            ApiClient::parse_create(Ok(HttpReply::json(200, &json!({"success": true})))),
            SubmitOutcome::Failed(_)
        ));
    }

    #[test]
    fn geocode_prefers_formatted_address() {
        let address = ApiClient::parse_geocode(Ok(HttpReply::json(
            200,
            &json!({"success": true, "address": "MG Rd", "formattedAddress": "MG Road, Bengaluru"}),
        )));
        assert_eq!(address.unwrap(), "MG Road, Bengaluru");

        let fallback = ApiClient::parse_geocode(Ok(HttpReply::json(200, &json!({"address": "MG Rd"}))));
        assert_eq!(fallback.unwrap(), "MG Rd");

        assert!(ApiClient::parse_geocode(Ok(HttpReply::json(200, &json!({})))).is_err());
    }

    #[test]
    fn status_not_found_maps_to_app_error() {
        let err = ApiClient::parse_status(Ok(HttpReply::json(404, &json!({"message": "Complaint not found"}))))
            .unwrap_err();
        let app: AppError = err.into();
        assert_eq!(app.kind, ErrorKind::NotFound);
        assert_eq!(app.message, "Complaint not found");
    }
}
