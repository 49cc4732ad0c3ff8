use std::time::Duration;

use async_trait::async_trait;
use crux_http::protocol::{HttpHeader, HttpRequest, HttpResponse, HttpResult};
use crux_http::HttpError;
use tracing::{debug, instrument, warn};

use crate::capabilities::TIMEOUT_HEADER;

/// Used when a request arrives without a timeout header.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Performs the core's HTTP requests.
#[async_trait]
pub trait HttpExecutor: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> HttpResult;
}

/// Splits the core's timeout hint off the outgoing headers.
#[must_use]
pub fn take_timeout(headers: &mut Vec<HttpHeader>) -> Duration {
    let mut timeout = DEFAULT_TIMEOUT;
    headers.retain(|header| {
        if !header.name.eq_ignore_ascii_case(TIMEOUT_HEADER) {
            return true;
        }
        match header.value.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => timeout = Duration::from_millis(ms),
            _ => debug!(value = %header.value, "ignoring malformed timeout header"),
        }
        false
    });
    timeout
}

pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("grievance/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    fn build(&self, mut request: HttpRequest) -> Result<reqwest::RequestBuilder, HttpError> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| HttpError::Url(e.to_string()))?;
        let timeout = take_timeout(&mut request.headers);

        let mut builder = self
            .client
            .request(method, request.url.as_str())
            .timeout(timeout);
        for header in &request.headers {
            builder = builder.header(header.name.as_str(), header.value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }
        Ok(builder)
    }
}

fn transport_error(error: &reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::Timeout
    } else {
        HttpError::Io(error.to_string())
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let builder = match self.build(request) {
            Ok(builder) => builder,
            Err(e) => return HttpResult::Err(e),
        };
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return HttpResult::Err(transport_error(&e)),
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|value| HttpHeader {
                    name: name.as_str().to_string(),
                    value: value.to_string(),
                })
            })
            .collect();
        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => return HttpResult::Err(transport_error(&e)),
        };

        if status >= 500 {
            warn!(status, "server error");
        } else {
            debug!(status, len = body.len(), "response");
        }
        HttpResult::Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(name: &str, value: &str) -> HttpHeader {
        HttpHeader {
            name: name.into(),
            value: value.into(),
        }
    }

    #[test]
    fn timeout_header_is_consumed() {
        let mut headers = vec![
            header("content-type", "application/json"),
            header(TIMEOUT_HEADER, "15000"),
        ];
        assert_eq!(take_timeout(&mut headers), Duration::from_secs(15));
        assert_eq!(headers, vec![header("content-type", "application/json")]);
    }

    #[test]
    fn malformed_timeout_falls_back() {
        let mut headers = vec![header("X-Client-Timeout-Ms", "soon")];
        assert_eq!(take_timeout(&mut headers), DEFAULT_TIMEOUT);
        assert!(headers.is_empty());
    }
}
