//! Helpers around `crux_http`: URL validation, multipart bodies and a
//! client-independent view of a finished exchange.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{AppError, ErrorKind};

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_REQUEST_BODY_SIZE: usize = 25 * 1024 * 1024;

/// Per-request timeout in milliseconds. The shell reads and strips it
/// before the request goes out.
pub const TIMEOUT_HEADER: &str = "x-client-timeout-ms";

/// An absolute http(s) URL without embedded credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
    scheme: String,
    host: String,
}

impl ValidatedUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, HttpError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(HttpError::InvalidUrl {
                url: String::new(),
                reason: "URL cannot be empty".to_string(),
            });
        }
        if url.len() > MAX_URL_LENGTH {
            return Err(HttpError::InvalidUrl {
                url: truncate(&url),
                reason: format!("URL exceeds maximum length of {MAX_URL_LENGTH} bytes"),
            });
        }

        let parsed = Url::parse(url.trim()).map_err(|e| HttpError::InvalidUrl {
            url: truncate(&url),
            reason: e.to_string(),
        })?;

        let scheme = parsed.scheme().to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(HttpError::InvalidUrl {
                url: truncate(&url),
                reason: format!("invalid scheme '{scheme}', only 'http' and 'https' are allowed"),
            });
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl {
                url: truncate(&url),
                reason: "URL must have a host".to_string(),
            })?
            .to_lowercase();

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(HttpError::InvalidUrl {
                url: truncate(&url),
                reason: "credentials in URL are not allowed".to_string(),
            });
        }

        Ok(Self {
            url: parsed.to_string(),
            scheme,
            host,
        })
    }

    /// The development API on this machine.
    #[must_use]
    pub fn localhost() -> Self {
        Self {
            url: "http://localhost:5000/api".to_string(),
            scheme: "http".to_string(),
            host: "localhost".to_string(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Appends `path` to this base, keeping any path prefix (e.g. `/api`).
    pub fn join_path(&self, path: &str) -> Result<Self, HttpError> {
        let base = self.url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Self::new(format!("{base}/{path}"))
    }

    pub fn with_query(&self, pairs: &[(&str, String)]) -> Result<Self, HttpError> {
        let mut parsed = Url::parse(&self.url).map_err(|e| HttpError::InvalidUrl {
            url: truncate(&self.url),
            reason: e.to_string(),
        })?;
        parsed
            .query_pairs_mut()
            .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())));
        Self::new(parsed.to_string())
    }
}

fn truncate(url: &str) -> String {
    if url.len() <= 100 {
        url.to_string()
    } else {
        let cut = url
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|i| *i <= 100)
            .last()
            .unwrap_or(0);
        format!("{}...", &url[..cut])
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub value: FormValue,
}

impl FormPart {
    #[must_use]
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }

    #[must_use]
    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            value: FormValue::File {
                file_name: file_name.into(),
                mime_type: mime_type.into(),
                bytes,
            },
        }
    }
}

/// A `multipart/form-data` body, encoded in the core so every shell sends
/// the same bytes.
pub struct MultipartForm {
    boundary: String,
    parts: Vec<FormPart>,
}

impl MultipartForm {
    #[must_use]
    pub fn new(parts: Vec<FormPart>) -> Self {
        Self {
            boundary: format!("grievance-{}", uuid::Uuid::new_v4().simple()),
            parts,
        }
    }

    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn encode(&self) -> Result<Vec<u8>, HttpError> {
        let mut body = Vec::new();
        for part in &self.parts {
            body.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match &part.value {
                FormValue::Text(text) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            part.name
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(text.as_bytes());
                }
                FormValue::File {
                    file_name,
                    mime_type,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{file_name}\"\r\nContent-Type: {mime_type}\r\n\r\n",
                            part.name
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());

        if body.len() > MAX_REQUEST_BODY_SIZE {
            return Err(HttpError::BodyTooLarge {
                size: body.len(),
                max: MAX_REQUEST_BODY_SIZE,
            });
        }
        Ok(body)
    }

    /// Reads a text field back out of an encoded body.
    #[must_use]
    pub fn text_field(content_type: &str, body: &[u8], name: &str) -> Option<String> {
        let boundary = content_type.split("boundary=").nth(1)?.trim();
        let header = format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n");
        let start = find(body, header.as_bytes())? + header.len();
        let terminator = format!("\r\n--{boundary}");
        let len = find(&body[start..], terminator.as_bytes())?;
        String::from_utf8(body[start..start + len].to_vec()).ok()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Status and body of an exchange that reached the server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpReply {
    pub status: u16,
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
}

impl HttpReply {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string().into_bytes())
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::InvalidResponse {
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for HttpReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReply")
            .field("status", &self.status)
            .field("len", &self.body.len())
            .finish()
    }
}

pub type HttpOutcome = Result<HttpReply, HttpError>;

/// Flattens what `crux_http` hands back into an [`HttpOutcome`]. Error
/// statuses stay replies so callers can read the server's message.
#[must_use]
pub fn outcome(result: crux_http::Result<crux_http::Response<Vec<u8>>>) -> HttpOutcome {
    match result {
        Ok(mut response) => {
            let status = u16::from(response.status());
            Ok(HttpReply::new(status, response.take_body().unwrap_or_default()))
        }
        Err(crux_http::HttpError::Http { code, .. }) => Ok(HttpReply::new(u16::from(code), Vec::new())),
        Err(crux_http::HttpError::Timeout) => Err(HttpError::Timeout),
        Err(other) => Err(HttpError::Connection {
            message: other.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request body too large: {size} bytes exceeds maximum of {max} bytes")]
    BodyTooLarge { size: usize, max: usize },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("request timed out")]
    Timeout,

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl HttpError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

impl From<HttpError> for AppError {
    fn from(e: HttpError) -> Self {
        let kind = match &e {
            HttpError::Timeout => ErrorKind::Timeout,
            HttpError::Connection { .. } => ErrorKind::Network,
            HttpError::InvalidResponse { .. } => ErrorKind::Deserialization,
            HttpError::Serialization { .. } => ErrorKind::Serialization,
            HttpError::InvalidUrl { .. } | HttpError::BodyTooLarge { .. } => ErrorKind::Validation,
        };
        AppError::new(kind, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_url_rejects_bad_input() {
        assert!(ValidatedUrl::new("").is_err());
        assert!(ValidatedUrl::new("ftp://example.com").is_err());
        assert!(ValidatedUrl::new("https://user:pw@example.com").is_err());
        assert!(ValidatedUrl::new("not a url").is_err());
        assert!(ValidatedUrl::new(format!("https://e.com/{}", "a".repeat(3000))).is_err());
    }

    #[test]
    fn test_validated_url_allows_local_api() {
        let url = ValidatedUrl::new("http://localhost:5000/api").unwrap();
        assert_eq!(url.host(), "localhost");
        assert_eq!(url.scheme(), "http");
        assert_eq!(ValidatedUrl::localhost(), url);
    }

    #[test]
    fn test_join_path_keeps_prefix() {
        let base = ValidatedUrl::new("http://localhost:5000/api/").unwrap();
        let joined = base.join_path("/complaints/classify").unwrap();
        assert_eq!(joined.as_str(), "http://localhost:5000/api/complaints/classify");
    }

    #[test]
    fn test_query_is_encoded() {
        let url = ValidatedUrl::new("https://example.com/api/complaints/geocode")
            .unwrap()
            .with_query(&[("latitude", "28.6".into()), ("longitude", "77.2".into())])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/api/complaints/geocode?latitude=28.6&longitude=77.2"
        );
    }

    #[test]
    fn test_multipart_round_trips_text_fields() {
        let form = MultipartForm::new(vec![
            FormPart::file("image", "photo.jpg", "image/jpeg", vec![0xFF, 0xD8, 0x0D, 0x0A]),
            FormPart::text("category", "Street Light Issue"),
            FormPart::text("description", ""),
        ]);
        let body = form.encode().unwrap();
        let content_type = form.content_type();

        assert_eq!(
            MultipartForm::text_field(&content_type, &body, "category").as_deref(),
            Some("Street Light Issue")
        );
        assert_eq!(
            MultipartForm::text_field(&content_type, &body, "description").as_deref(),
            Some("")
        );
        assert_eq!(MultipartForm::text_field(&content_type, &body, "image"), None);
        assert_eq!(MultipartForm::text_field(&content_type, &body, "missing"), None);

        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("filename=\"photo.jpg\"\r\nContent-Type: image/jpeg"));
        assert!(text.ends_with("--\r\n"));
    }

    #[test]
    fn test_body_size_limit() {
        let result = MultipartForm::new(vec![FormPart::file(
            "image",
            "big.jpg",
            "image/jpeg",
            vec![0; MAX_REQUEST_BODY_SIZE + 1],
        )])
        .encode();
        assert!(matches!(result, Err(HttpError::BodyTooLarge { .. })));
    }

    #[test]
    fn test_error_retryability() {
        assert!(HttpError::Timeout.is_retryable());
        assert!(HttpError::Connection { message: "refused".into() }.is_retryable());
        assert!(!HttpError::InvalidResponse { reason: "x".into() }.is_retryable());
    }
}
