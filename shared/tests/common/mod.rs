//! Drives the core through `crux_core`'s tester and sorts what it asks for.
//!
//! Capability results come back from the tester as events; the harness
//! feeds them in straight away, so each call returns every effect the step
//! produced.

#![allow(dead_code)]

use std::fmt;

use crux_core::capability::Operation;
use crux_core::testing::AppTester;
use crux_core::Request;
use crux_http::protocol::{HttpRequest, HttpResponse, HttpResult};
use crux_kv::value::Value;
use crux_kv::{KeyValueOperation, KeyValueResponse, KeyValueResult};
use shared::capabilities::{MultipartForm, TimerOperation};
use shared::geolocation::GeolocationOperation;
use shared::image_processing::CompressOperation;
use shared::{App, Effect, Event, Model, ViewModel};

#[derive(Default)]
pub struct Harness {
    app: AppTester<App, Effect>,
}

impl Harness {
    pub fn update(&self, event: Event, model: &mut Model) -> Effects {
        let update = self.app.update(event, model);
        self.settle(update.effects, update.events, model)
    }

    pub fn resolve<Op>(&self, request: &mut Request<Op>, output: Op::Output, model: &mut Model) -> Effects
    where
        Op: Operation,
    {
        let update = self
            .app
            .resolve(request, output)
            .expect("request should resolve");
        self.settle(update.effects, update.events, model)
    }

    pub fn view(&self, model: &Model) -> ViewModel {
        self.app.view(model)
    }

    fn settle(&self, mut effects: Vec<Effect>, events: Vec<Event>, model: &mut Model) -> Effects {
        for event in events {
            effects.extend(self.update(event, model).effects);
        }
        Effects { effects }
    }
}

pub struct Effects {
    pub effects: Vec<Effect>,
}

impl Effects {
    pub fn renders(&self) -> bool {
        self.effects.iter().any(|e| matches!(e, Effect::Render(_)))
    }

    pub fn http(&mut self) -> Vec<Request<HttpRequest>> {
        self.take(|e| match e {
            Effect::Http(r) => Ok(r),
            other => Err(other),
        })
    }

    pub fn kv(&mut self) -> Vec<Request<KeyValueOperation>> {
        self.take(|e| match e {
            Effect::KeyValue(r) => Ok(r),
            other => Err(other),
        })
    }

    pub fn geolocation(&mut self) -> Vec<Request<GeolocationOperation>> {
        self.take(|e| match e {
            Effect::Geolocation(r) => Ok(r),
            other => Err(other),
        })
    }

    pub fn compress(&mut self) -> Vec<Request<CompressOperation>> {
        self.take(|e| match e {
            Effect::Compress(r) => Ok(r),
            other => Err(other),
        })
    }

    pub fn timers(&mut self) -> Vec<Request<TimerOperation>> {
        self.take(|e| match e {
            Effect::Timer(r) => Ok(r),
            other => Err(other),
        })
    }

    fn take<T>(&mut self, pick: impl Fn(Effect) -> Result<T, Effect>) -> Vec<T> {
        let mut picked = Vec::new();
        let mut rest = Vec::new();
        for effect in self.effects.drain(..) {
            match pick(effect) {
                Ok(r) => picked.push(r),
                Err(other) => rest.push(other),
            }
        }
        self.effects = rest;
        picked
    }
}

impl fmt::Debug for Effects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.effects.iter().map(Effect::name))
            .finish()
    }
}

// --- HTTP ---

pub fn reply(status: u16, body: &serde_json::Value) -> HttpResult {
    HttpResult::Ok(HttpResponse {
        status,
        headers: Vec::new(),
        body: serde_json::to_vec(body).unwrap(),
    })
}

pub fn ok(body: serde_json::Value) -> HttpResult {
    reply(200, &body)
}

pub fn header<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// A text field of a multipart request body.
pub fn form_text(request: &HttpRequest, name: &str) -> Option<String> {
    let content_type = header(request, "content-type")?;
    MultipartForm::text_field(content_type, &request.body, name)
}

// --- Key-value ---

pub fn stored(bytes: Option<Vec<u8>>) -> KeyValueResult {
    KeyValueResult::Ok {
        response: KeyValueResponse::Get {
            value: bytes.map_or(Value::None, Value::Bytes),
        },
    }
}

pub fn written() -> KeyValueResult {
    KeyValueResult::Ok {
        response: KeyValueResponse::Set {
            previous: Value::None,
        },
    }
}

pub fn set_value<'a>(requests: &'a [Request<KeyValueOperation>], wanted: &str) -> Option<&'a [u8]> {
    requests.iter().find_map(|r| match &r.operation {
        KeyValueOperation::Set { key, value } if key == wanted => Some(value.as_slice()),
        _ => None,
    })
}

pub fn deletes(requests: &[Request<KeyValueOperation>], wanted: &str) -> bool {
    requests
        .iter()
        .any(|r| matches!(&r.operation, KeyValueOperation::Delete { key } if key == wanted))
}

/// Canned values. The library keeps its own behind `test-utils`.
pub mod fixtures {
    use shared::category::Category;
    use shared::classification::{ConfidenceLabel, Prediction};
    use shared::config::ClientConfig;
    use shared::duplicates::DuplicateCandidate;
    use shared::geolocation::GeoFix;
    use shared::image_processing::CompressedImage;
    use shared::tracking::ComplaintStatus;
    use shared::wizard::{CategoryChoice, ComplaintDraft, ComplaintSubmission, Photo};
    use shared::{Description, Model, SessionId, UnixTimeMs};

    pub fn compressed_image() -> CompressedImage {
        let bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        CompressedImage {
            fingerprint: blake3::hash(&bytes).to_hex().to_string(),
            original_size: 2_400_000,
            bytes,
            width: 1920,
            height: 1440,
            quality: 85,
        }
    }

    pub fn photo() -> Photo {
        Photo::from(compressed_image())
    }

    pub fn fix() -> GeoFix {
        GeoFix::new(12.9716, 77.5946, 8.0, UnixTimeMs(1_700_000_000_000)).unwrap()
    }

    fn street_light() -> CategoryChoice {
        let prediction = Prediction {
            category: Category::StreetLight,
            confidence: ConfidenceLabel::High,
            score: ConfidenceLabel::High.score(),
            server_category: Category::StreetLight,
            raw_label: None,
            downgraded: false,
            alternatives: Vec::new(),
        };
        CategoryChoice::from_prediction(&prediction).unwrap()
    }

    pub fn complete_draft() -> ComplaintDraft {
        ComplaintDraft::WithLocation {
            photo: photo(),
            category: street_light(),
            location: fix(),
            address: Some("MG Road, Bengaluru".into()),
        }
    }

    pub fn submission() -> ComplaintSubmission {
        ComplaintSubmission {
            session_id: SessionId::new("session-fixture"),
            photo: photo(),
            category: street_light(),
            location: fix(),
            address: Some("MG Road, Bengaluru".into()),
            description: Description::new("Street light has been out for a week").unwrap(),
            preferred_language: "en".into(),
            confirm_not_duplicate: false,
        }
    }

    pub fn candidate(id: &str, distance_meters: f64) -> DuplicateCandidate {
        DuplicateCandidate {
            complaint_id: id.into(),
            category: Category::StreetLight.label().into(),
            distance_meters,
            status: ComplaintStatus::Pending,
            address: Some("MG Road, Bengaluru".into()),
            created_at: None,
        }
    }

    pub fn model() -> Model {
        Model::new(ClientConfig {
            api_base_url: "https://grievance.example.org/api".into(),
            ..ClientConfig::default()
        })
        .unwrap()
    }
}
