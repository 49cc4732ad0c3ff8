//! Canned values for unit tests and, behind the `test-utils` feature, for
//! shells and downstream crates.

/// Canned values shared by unit and integration tests.
///
/// These panic on invalid input; they only ever see constants.
pub mod fixtures {
    use crate::category::Category;
    use crate::classification::{ConfidenceLabel, Prediction};
    use crate::config::ClientConfig;
    use crate::duplicates::DuplicateCandidate;
    use crate::geolocation::GeoFix;
    use crate::image_processing::CompressedImage;
    use crate::tracking::ComplaintStatus;
    use crate::wizard::{CategoryChoice, ComplaintDraft, ComplaintSubmission, Photo};
    use crate::{Description, Model, SessionId, UnixTimeMs};

    #[must_use]
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

    #[must_use]
    pub fn photo() -> Photo {
        Photo::from(compressed_image())
    }

    #[must_use]
    pub fn fix() -> GeoFix {
        GeoFix::new(12.9716, 77.5946, 8.0, UnixTimeMs(1_700_000_000_000))
            .expect("fixture coordinates are valid")
    }

    #[must_use]
    pub fn prediction(category: Category) -> Prediction {
        Prediction {
            category,
            confidence: ConfidenceLabel::High,
            score: ConfidenceLabel::High.score(),
            server_category: category,
            raw_label: None,
            downgraded: false,
            alternatives: Vec::new(),
        }
    }

    #[must_use]
    pub fn street_light() -> CategoryChoice {
        CategoryChoice::from_prediction(&prediction(Category::StreetLight))
            .expect("street light is not the catch-all")
    }

    #[must_use]
    pub fn complete_draft() -> ComplaintDraft {
        ComplaintDraft::WithLocation {
            photo: photo(),
            category: street_light(),
            location: fix(),
            address: Some("MG Road, Bengaluru".into()),
        }
    }

    #[must_use]
    pub fn submission() -> ComplaintSubmission {
        ComplaintSubmission {
            session_id: SessionId::new("session-fixture"),
            photo: photo(),
            category: street_light(),
            location: fix(),
            address: Some("MG Road, Bengaluru".into()),
            description: Description::new("Street light has been out for a week")
                .expect("fixture description fits"),
            preferred_language: "en".into(),
            confirm_not_duplicate: false,
        }
    }

    /// A submission whose photo weighs `size` bytes.
    #[must_use]
    pub fn submission_with_photo_bytes(size: usize) -> ComplaintSubmission {
        let bytes = vec![0xA5; size];
        let photo = Photo::from(CompressedImage {
            fingerprint: blake3::hash(&bytes).to_hex().to_string(),
            original_size: size,
            bytes,
            width: 4000,
            height: 3000,
            quality: 85,
        });
        ComplaintSubmission {
            photo,
            ..submission()
        }
    }

    #[must_use]
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

    /// A model pointed at a fixed test host.
    #[must_use]
    pub fn model() -> Model {
        let config = ClientConfig {
            api_base_url: "https://grievance.example.org/api".into(),
            ..ClientConfig::default()
        };
        Model::new(config).expect("default config is valid")
    }
}
