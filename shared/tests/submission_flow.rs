mod common;

use common::{deletes, fixtures, form_text, header, ok, reply, Effects, Harness};
use crux_core::Request;
use crux_http::protocol::{HttpRequest, HttpResult};
use crux_http::HttpError;
use serde_json::json;
use shared::capabilities::TIMEOUT_HEADER;
use shared::category::Category;
use shared::image_processing::ImageSource;
use shared::wizard::{Outcome, PendingOp, WizardStep};
use shared::{ComplaintId, Event, Model};

fn only_http(effects: &mut Effects) -> Request<HttpRequest> {
    let mut requests = effects.http();
    assert_eq!(requests.len(), 1, "expected one request, got {effects:?}");
    requests.remove(0)
}

fn network_down() -> HttpResult {
    HttpResult::Err(HttpError::Io("network unreachable".into()))
}

/// Consent and a compressed photo.
fn with_photo(app: &Harness, model: &mut Model) {
    app.update(Event::ConsentAccepted, model);
    assert_eq!(model.wizard.step(), WizardStep::Photo);

    let mut effects = app.update(
        Event::PhotoSelected(Box::new(ImageSource::Bytes(vec![0xFF, 0xD8]))),
        model,
    );
    let mut compress = effects.compress().pop().expect("compress effect");
    app.resolve(&mut compress, Ok(fixtures::compressed_image()), model);
    assert!(app.view(model).wizard.photo_data_uri.is_some());
}

/// Photo and a confident classification.
fn through_classify(app: &Harness, model: &mut Model) {
    with_photo(app, model);

    let mut effects = app.update(Event::ProceedToClassify, model);
    let mut classify = only_http(&mut effects);
    assert_eq!(classify.operation.method, "POST");
    assert!(classify.operation.url.ends_with("/complaints/classify"));
    app.resolve(
        &mut classify,
        ok(json!({"category": "Street Light Issue", "confidence": "high"})),
        model,
    );
}

/// Location, address and description.
fn through_details(app: &Harness, model: &mut Model) {
    let mut effects = app.update(Event::ProceedToDetails, model);
    let mut locate = effects.geolocation().pop().expect("geolocation effect");
    let mut effects = app.resolve(&mut locate, Ok(fixtures::fix()), model);

    let mut geocode = only_http(&mut effects);
    app.resolve(
        &mut geocode,
        ok(json!({"formattedAddress": "MG Road, Bengaluru"})),
        model,
    );

    app.update(
        Event::DescriptionChanged {
            text: "Street light out since Monday".into(),
        },
        model,
    );
}

/// Through the duplicate check with nothing found nearby.
fn through_preview(app: &Harness, model: &mut Model) {
    through_classify(app, model);
    through_details(app, model);
    let mut effects = app.update(Event::ProceedToPreview, model);
    app.resolve(&mut only_http(&mut effects), ok(json!({"duplicates": []})), model);
    assert_eq!(model.wizard.step(), WizardStep::Preview);
}

#[test]
fn test_happy_path_submits_and_clears_draft() {
    let app = Harness::default();
    let mut model = fixtures::model();

    through_classify(&app, &mut model);
    let view = app.view(&model).wizard;
    assert_eq!(view.category.as_deref(), Some("Street Light Issue"));
    assert_eq!(view.ai_confidence, Some(0.9));
    assert!(!view.category_overridden);

    through_details(&app, &mut model);
    let view = app.view(&model).wizard;
    assert_eq!(view.address.as_deref(), Some("MG Road, Bengaluru"));
    assert_eq!(view.description_remaining, 500 - "Street light out since Monday".len());

    let mut effects = app.update(Event::ProceedToPreview, &mut model);
    let mut check = only_http(&mut effects);
    assert!(check.operation.url.ends_with("/complaints/check-duplicates"));
    app.resolve(
        &mut check,
        ok(json!({"isDuplicate": false, "duplicates": []})),
        &mut model,
    );
    assert_eq!(model.wizard.step(), WizardStep::Preview);
    assert!(app.view(&model).wizard.can_submit);

    let mut effects = app.update(Event::SubmitRequested, &mut model);
    let mut create = only_http(&mut effects);
    assert_eq!(form_text(&create.operation, "category").as_deref(), Some("Street Light Issue"));
    assert_eq!(form_text(&create.operation, "confirmNotDuplicate"), None);
    assert_eq!(
        form_text(&create.operation, "description").as_deref(),
        Some("Street light out since Monday")
    );

    let mut effects = app.resolve(
        &mut create,
        reply(201, &json!({"complaintId": "GRV-2026-0042"})),
        &mut model,
    );
    let view = app.view(&model);
    assert_eq!(view.wizard.step, WizardStep::Success);
    assert_eq!(
        view.wizard.outcome,
        Some(Outcome::Submitted {
            complaint_id: ComplaintId::new("GRV-2026-0042")
        })
    );
    assert!(view.toast.unwrap().message.contains("GRV-2026-0042"));
    assert!(deletes(&effects.kv(), "draft:current"));
    assert!(effects.timers().is_empty());
}

#[test]
fn test_requests_carry_timeouts_and_expected_shapes() {
    let app = Harness::default();
    let mut model = fixtures::model();
    with_photo(&app, &mut model);

    let mut effects = app.update(Event::ProceedToClassify, &mut model);
    let mut classify = only_http(&mut effects);
    assert_eq!(header(&classify.operation, TIMEOUT_HEADER), Some("30000"));
    assert!(header(&classify.operation, "content-type")
        .is_some_and(|v| v.starts_with("multipart/form-data; boundary=")));
    app.resolve(
        &mut classify,
        ok(json!({"category": "Street Light Issue", "confidence": "high"})),
        &mut model,
    );

    let mut effects = app.update(Event::ProceedToDetails, &mut model);
    let mut locate = effects.geolocation().pop().expect("geolocation effect");
    let mut effects = app.resolve(&mut locate, Ok(fixtures::fix()), &mut model);
    let mut geocode = only_http(&mut effects);
    assert_eq!(geocode.operation.method, "GET");
    assert_eq!(
        geocode.operation.url,
        "https://grievance.example.org/api/complaints/geocode?latitude=12.9716&longitude=77.5946"
    );
    assert_eq!(header(&geocode.operation, TIMEOUT_HEADER), Some("10000"));
    app.resolve(&mut geocode, ok(json!({"formattedAddress": "MG Road"})), &mut model);

    let mut effects = app.update(Event::ProceedToPreview, &mut model);
    let check = only_http(&mut effects);
    assert_eq!(check.operation.method, "POST");
    assert_eq!(header(&check.operation, TIMEOUT_HEADER), Some("15000"));
    let body: serde_json::Value = serde_json::from_slice(&check.operation.body).unwrap();
    assert_eq!(
        body,
        json!({"latitude": 12.9716, "longitude": 77.5946, "category": "Street Light Issue"})
    );
}

#[test]
fn test_nearby_duplicate_blocks_until_confirmed() {
    let app = Harness::default();
    let mut model = fixtures::model();
    through_classify(&app, &mut model);
    through_details(&app, &mut model);

    let mut effects = app.update(Event::ProceedToPreview, &mut model);
    let mut check = only_http(&mut effects);
    app.resolve(
        &mut check,
        ok(json!({
            "isDuplicate": true,
            "duplicates": [
                {"complaintId": "GRV-7", "category": "Street Light Issue", "distance": 18.4, "status": "in_progress"},
                {"complaintId": "GRV-9", "category": "Street Light Issue", "distance": 240.0, "status": "pending"}
            ]
        })),
        &mut model,
    );

    let view = app.view(&model).wizard;
    assert_eq!(view.step, WizardStep::Details);
    let prompt = view.duplicate_prompt.expect("duplicate prompt");
    assert_eq!(prompt.primary.complaint_id, "GRV-7");
    assert_eq!(prompt.others.len(), 1);
    assert!(!view.can_go_next);

    // Submitting is refused while the prompt is open.
    let mut effects = app.update(Event::SubmitRequested, &mut model);
    assert!(effects.http().is_empty());

    app.update(Event::NotDuplicateConfirmed, &mut model);
    assert_eq!(model.wizard.step(), WizardStep::Preview);

    let mut effects = app.update(Event::SubmitRequested, &mut model);
    let create = only_http(&mut effects);
    assert_eq!(
        form_text(&create.operation, "confirmNotDuplicate").as_deref(),
        Some("true")
    );
}

#[test]
fn test_cancelling_duplicate_prompt_returns_to_details() {
    let app = Harness::default();
    let mut model = fixtures::model();
    through_classify(&app, &mut model);
    through_details(&app, &mut model);

    let mut effects = app.update(Event::ProceedToPreview, &mut model);
    let mut check = only_http(&mut effects);
    app.resolve(
        &mut check,
        ok(json!({"isDuplicate": true, "duplicates": [{"complaintId": "GRV-7", "distance": 10}]})),
        &mut model,
    );
    app.update(Event::DuplicateModalCancelled, &mut model);

    let view = app.view(&model).wizard;
    assert_eq!(view.step, WizardStep::Details);
    assert!(view.duplicate_prompt.is_none());
    assert!(view.can_go_next);
}

#[test]
fn test_server_conflict_on_create_reopens_prompt() {
    let app = Harness::default();
    let mut model = fixtures::model();
    through_preview(&app, &mut model);

    let mut effects = app.update(Event::SubmitRequested, &mut model);
    let mut create = only_http(&mut effects);
    app.resolve(
        &mut create,
        reply(
            409,
            &json!({"isDuplicate": true, "duplicates": [{"complaintId": "GRV-3", "distance": 5}]}),
        ),
        &mut model,
    );
    let view = app.view(&model).wizard;
    assert_eq!(view.step, WizardStep::Preview);
    assert_eq!(view.duplicate_prompt.unwrap().primary.complaint_id, "GRV-3");

    // Confirming from preview resubmits straight away with the flag.
    let mut effects = app.update(Event::NotDuplicateConfirmed, &mut model);
    let retry = only_http(&mut effects);
    assert_eq!(
        form_text(&retry.operation, "confirmNotDuplicate").as_deref(),
        Some("true")
    );
}

#[test]
fn test_back_is_refused_while_submission_in_flight() {
    let app = Harness::default();
    let mut model = fixtures::model();
    through_preview(&app, &mut model);

    let mut effects = app.update(Event::SubmitRequested, &mut model);
    let mut create = only_http(&mut effects);
    assert_eq!(app.view(&model).wizard.busy, Some(PendingOp::Submission));

    app.update(
        Event::GoBack {
            to: WizardStep::Details,
        },
        &mut model,
    );
    assert_eq!(model.wizard.step(), WizardStep::Preview);

    app.resolve(
        &mut create,
        reply(201, &json!({"complaintId": "GRV-2026-0050"})),
        &mut model,
    );
    assert_eq!(
        app.view(&model).wizard.outcome,
        Some(Outcome::Submitted {
            complaint_id: ComplaintId::new("GRV-2026-0050")
        })
    );
}

#[test]
fn test_unreachable_duplicate_check_does_not_block() {
    let app = Harness::default();
    let mut model = fixtures::model();
    through_classify(&app, &mut model);
    through_details(&app, &mut model);

    let mut effects = app.update(Event::ProceedToPreview, &mut model);
    let mut check = only_http(&mut effects);
    app.resolve(&mut check, HttpResult::Err(HttpError::Timeout), &mut model);
    let view = app.view(&model).wizard;
    assert_eq!(view.step, WizardStep::Preview);
    assert!(view.duplicates_unverified);
    assert!(view.can_submit);
}

#[test]
fn test_low_confidence_needs_manual_category() {
    let app = Harness::default();
    let mut model = fixtures::model();
    with_photo(&app, &mut model);
    let mut effects = app.update(Event::ProceedToClassify, &mut model);
    app.resolve(
        &mut only_http(&mut effects),
        ok(json!({"category": "Fallen Trees", "confidence": "low"})),
        &mut model,
    );

    let view = app.view(&model).wizard;
    assert_eq!(view.category, None);
    assert!(view.needs_category_override);
    assert_eq!(view.low_confidence_suggestion.as_deref(), Some("Fallen Trees"));

    // Next does nothing until the user picks.
    let mut effects = app.update(Event::ProceedToDetails, &mut model);
    assert!(effects.geolocation().is_empty());

    app.update(
        Event::CategoryOverridden {
            category: Category::FallenTrees,
        },
        &mut model,
    );
    let view = app.view(&model).wizard;
    assert!(view.category_overridden);
    assert_eq!(view.ai_confidence, None);

    let mut effects = app.update(Event::ProceedToDetails, &mut model);
    assert_eq!(effects.geolocation().len(), 1);
}

#[test]
fn test_classification_retries_are_bounded() {
    let app = Harness::default();
    let mut model = fixtures::model();
    with_photo(&app, &mut model);

    let mut effects = app.update(Event::ProceedToClassify, &mut model);
    app.resolve(&mut only_http(&mut effects), network_down(), &mut model);
    for _ in 0..2 {
        assert!(app.view(&model).wizard.can_retry_classification);
        let mut effects = app.update(Event::RetryClassification, &mut model);
        app.resolve(&mut only_http(&mut effects), network_down(), &mut model);
    }

    let view = app.view(&model).wizard;
    assert!(!view.can_retry_classification);
    assert!(view.classification_error.is_some());
    let mut effects = app.update(Event::RetryClassification, &mut model);
    assert!(effects.http().is_empty());
}

#[test]
fn test_result_from_abandoned_step_is_ignored() {
    let app = Harness::default();
    let mut model = fixtures::model();
    with_photo(&app, &mut model);
    let mut effects = app.update(Event::ProceedToClassify, &mut model);
    let mut in_flight = only_http(&mut effects);

    app.update(
        Event::GoBack {
            to: WizardStep::Photo,
        },
        &mut model,
    );
    app.resolve(
        &mut in_flight,
        ok(json!({"category": "Street Light Issue", "confidence": "high"})),
        &mut model,
    );

    let view = app.view(&model).wizard;
    assert_eq!(view.step, WizardStep::Photo);
    assert_eq!(view.category, None);
    assert!(view.busy.is_none());
}

#[test]
fn test_same_photo_is_not_classified_twice() {
    let app = Harness::default();
    let mut model = fixtures::model();
    through_classify(&app, &mut model);

    app.update(
        Event::GoBack {
            to: WizardStep::Photo,
        },
        &mut model,
    );
    assert_eq!(app.view(&model).wizard.photo_data_uri, None);

    // Picking the same picture again reuses the earlier prediction.
    let mut effects = app.update(
        Event::PhotoSelected(Box::new(ImageSource::Bytes(vec![0xFF, 0xD8]))),
        &mut model,
    );
    app.resolve(
        &mut effects.compress().remove(0),
        Ok(fixtures::compressed_image()),
        &mut model,
    );
    let mut effects = app.update(Event::ProceedToClassify, &mut model);
    assert!(effects.http().is_empty());
    assert_eq!(
        app.view(&model).wizard.category.as_deref(),
        Some("Street Light Issue")
    );
}

#[test]
fn test_status_lookup() {
    let app = Harness::default();
    let mut model = fixtures::model();

    let mut effects = app.update(
        Event::TrackComplaintRequested {
            complaint_id: " GRV-2026-0042 ".into(),
        },
        &mut model,
    );
    assert!(app.view(&model).tracking.loading);
    let mut request = only_http(&mut effects);
    assert!(request.operation.url.ends_with("/complaints/status/GRV-2026-0042"));
    app.resolve(
        &mut request,
        ok(json!({
            "complaintId": "GRV-2026-0042",
            "category": "Street Light Issue",
            "status": "in_progress",
            "statusHistory": []
        })),
        &mut model,
    );
    let tracking = app.view(&model).tracking;
    assert!(!tracking.loading);
    let record = tracking.record.expect("record");
    assert_eq!(record.complaint_id, "GRV-2026-0042");

    let effects = app.update(
        Event::TrackComplaintRequested {
            complaint_id: "../etc".into(),
        },
        &mut model,
    );
    assert!(effects.effects.iter().all(|e| e.name() == "render"));
    assert!(app.view(&model).tracking.error.is_some());
}
