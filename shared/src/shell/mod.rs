//! Native shell. Executes the core's effects with real I/O so the wizard
//! can run from a terminal and be exercised end to end in tests.

pub mod geolocation;
pub mod http;
pub mod kv;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crux_core::{Core, Request};
use crux_http::protocol::{HttpRequest, HttpResult};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, trace};
use tracing_subscriber::EnvFilter;

use crate::capabilities::TimerOperation;
use crate::config::{ClientConfig, ConfigError};
use crate::image_processing::{CompressOperation, CompressResult, ImageCompressor};
use crate::{App, AppError, Effect, Event, ViewModel};

pub use self::geolocation::{FixedLocation, GeolocationProvider, NoLocation};
pub use self::http::{HttpExecutor, ReqwestExecutor};
pub use self::kv::{KvStore, MemoryKvStore, SqliteKvStore};

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    App(#[from] AppError),
}

/// Logs go to stderr so command output stays clean. `RUST_LOG` wins over
/// `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Owns the core and drives it: events in, effects out, results back in.
///
/// Storage and location answer synchronously. HTTP, compression and timers
/// run as tokio tasks; their requests wait in `parked` until the task
/// reports back, and are then resolved against the core.
pub struct Shell {
    core: Core<Effect, App>,
    http: Arc<dyn HttpExecutor>,
    kv: Box<dyn KvStore>,
    geolocation: Box<dyn GeolocationProvider>,
    compressor: Arc<ImageCompressor>,
    effects: VecDeque<Effect>,
    parked: HashMap<u64, Parked>,
    next_task: u64,
    in_flight: JoinSet<(u64, Finished)>,
    renders: usize,
}

enum Parked {
    Http(Request<HttpRequest>),
    Compress(Request<CompressOperation>),
    Timer(Request<TimerOperation>),
}

enum Finished {
    Http(HttpResult),
    Compress(CompressResult),
    Timer,
}

impl Shell {
    /// Hands `config` to a fresh core before anything else reaches it.
    pub fn new(
        config: ClientConfig,
        http: Arc<dyn HttpExecutor>,
        kv: Box<dyn KvStore>,
        geolocation: Box<dyn GeolocationProvider>,
    ) -> Self {
        let core = Core::new();
        let effects = core
            .process_event(Event::ConfigLoaded(Box::new(config)))
            .into();
        Self {
            core,
            http,
            kv,
            geolocation,
            compressor: Arc::new(ImageCompressor::default()),
            effects,
            parked: HashMap::new(),
            next_task: 0,
            in_flight: JoinSet::new(),
            renders: 0,
        }
    }

    #[must_use]
    pub fn view(&self) -> ViewModel {
        self.core.view()
    }

    #[must_use]
    pub const fn renders(&self) -> usize {
        self.renders
    }

    /// Sends one event and waits until every effect it caused has settled.
    pub async fn dispatch(&mut self, event: Event) {
        trace!(event = event.name(), "dispatch");
        let effects = self.core.process_event(event);
        self.effects.extend(effects);
        self.run_until_idle().await;
    }

    pub async fn run_until_idle(&mut self) {
        loop {
            while let Some(effect) = self.effects.pop_front() {
                self.perform(effect);
            }

            match self.in_flight.join_next().await {
                Some(Ok((task, finished))) => self.finish(task, finished),
                Some(Err(e)) => error!(error = %e, "effect task failed"),
                None => break,
            }
        }
    }

    fn perform(&mut self, effect: Effect) {
        debug!(effect = effect.name(), "perform");
        match effect {
            Effect::Render(_) => self.renders += 1,

            Effect::KeyValue(mut request) => {
                let output = self.kv.execute(request.operation.clone());
                let effects = self.core.resolve(&mut request, output);
                self.effects.extend(effects);
            }

            Effect::Geolocation(mut request) => {
                let output = self.geolocation.locate(&request.operation.options);
                let effects = self.core.resolve(&mut request, output);
                self.effects.extend(effects);
            }

            Effect::Http(request) => {
                let operation = request.operation.clone();
                let http = Arc::clone(&self.http);
                self.spawn(Parked::Http(request), async move {
                    Finished::Http(http.execute(operation).await)
                });
            }

            Effect::Compress(request) => {
                let operation = request.operation.clone();
                let compressor = Arc::clone(&self.compressor);
                self.spawn(Parked::Compress(request), async move {
                    Finished::Compress(compressor.run(operation).await)
                });
            }

            Effect::Timer(request) => {
                let after = Duration::from_millis(request.operation.after_ms);
                self.spawn(Parked::Timer(request), async move {
                    tokio::time::sleep(after).await;
                    Finished::Timer
                });
            }
        }
    }

    fn spawn<F>(&mut self, request: Parked, work: F)
    where
        F: std::future::Future<Output = Finished> + Send + 'static,
    {
        let task = self.next_task;
        self.next_task += 1;
        self.parked.insert(task, request);
        self.in_flight.spawn(async move { (task, work.await) });
    }

    fn finish(&mut self, task: u64, finished: Finished) {
        let Some(parked) = self.parked.remove(&task) else {
            error!(task, "no request waiting for this result");
            return;
        };
        let effects = match (parked, finished) {
            (Parked::Http(mut request), Finished::Http(output)) => {
                self.core.resolve(&mut request, output)
            }
            (Parked::Compress(mut request), Finished::Compress(output)) => {
                self.core.resolve(&mut request, output)
            }
            (Parked::Timer(mut request), Finished::Timer) => self.core.resolve(&mut request, ()),
            _ => {
                error!(task, "result does not match its request");
                return;
            }
        };
        self.effects.extend(effects);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::KvKey;
    use crate::category::Category;
    use crate::config::ClientConfig;
    use crate::geolocation::GeoError;
    use crate::image_processing::test_support::gradient_png;
    use crate::image_processing::ImageSource;
    use crate::offline_store::{OfflineQueue, SyncStatus};
    use crate::testing::fixtures;
    use crate::wizard::{Outcome, WizardStep};
    use async_trait::async_trait;
    use crux_http::protocol::HttpResponse;
    use crux_kv::value::Value;
    use crux_kv::{KeyValueOperation, KeyValueResponse, KeyValueResult};
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers by path, records every request.
    #[derive(Default)]
    struct StubServer {
        offline: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpExecutor for StubServer {
        async fn execute(&self, request: HttpRequest) -> HttpResult {
            let path = request.url.clone();
            self.seen.lock().unwrap().push(path.clone());
            if self.offline {
                return HttpResult::Err(crux_http::HttpError::Io("network unreachable".into()));
            }
            let body = if path.ends_with("/complaints/classify") {
                json!({"category": "Street Light Issue", "confidence": "high"})
            } else if path.ends_with("/complaints/check-duplicates") {
                json!({"isDuplicate": false, "duplicates": []})
            } else if path.contains("/complaints/geocode") {
                json!({"formattedAddress": "MG Road, Bengaluru"})
            } else if path.ends_with("/complaints") {
                json!({"complaintId": "GRV-2026-0042"})
            } else {
                return reply(404, &json!({"message": "not found"}));
            };
            reply(200, &body)
        }
    }

    fn reply(status: u16, body: &serde_json::Value) -> HttpResult {
        HttpResult::Ok(HttpResponse {
            status,
            headers: Vec::new(),
            body: serde_json::to_vec(body).unwrap(),
        })
    }

    fn config() -> ClientConfig {
        ClientConfig {
            api_base_url: "https://grievance.example.org/api".into(),
            autosave_debounce_ms: 5,
            ..ClientConfig::default()
        }
    }

    fn shell(server: Arc<StubServer>, kv: Box<dyn KvStore>) -> Shell {
        Shell::new(
            config(),
            server,
            kv,
            Box::new(FixedLocation::new(fixtures::fix())),
        )
    }

    async fn walk_to_preview(shell: &mut Shell) {
        shell.dispatch(Event::WizardOpened).await;
        shell.dispatch(Event::ConsentAccepted).await;
        shell
            .dispatch(Event::PhotoSelected(Box::new(ImageSource::Bytes(gradient_png(
                320, 240,
            )))))
            .await;
        assert!(shell.view().wizard.photo_data_uri.is_some());
        shell.dispatch(Event::ProceedToClassify).await;
        assert_eq!(shell.view().wizard.category.as_deref(), Some("Street Light Issue"));
        shell.dispatch(Event::ProceedToDetails).await;
        assert_eq!(shell.view().wizard.address.as_deref(), Some("MG Road, Bengaluru"));
        shell
            .dispatch(Event::DescriptionChanged {
                text: "Light out near the bus stop".into(),
            })
            .await;
        shell.dispatch(Event::ProceedToPreview).await;
        assert_eq!(shell.view().wizard.step, WizardStep::Preview);
    }

    #[tokio::test]
    async fn submits_end_to_end() {
        let server = Arc::new(StubServer::default());
        let mut shell = shell(Arc::clone(&server), Box::new(MemoryKvStore::default()));

        walk_to_preview(&mut shell).await;
        shell.dispatch(Event::SubmitRequested).await;

        let view = shell.view();
        assert_eq!(view.wizard.step, WizardStep::Success);
        assert_eq!(
            view.wizard.outcome,
            Some(Outcome::Submitted {
                complaint_id: crate::ComplaintId::new("GRV-2026-0042")
            })
        );
        assert!(shell.renders() > 0);
        let seen = server.seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|p| p.ends_with("/complaints")).count(), 1);
    }

    #[tokio::test]
    async fn offline_submission_lands_in_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grievance.db");
        let server = Arc::new(StubServer::default());

        {
            let mut shell = shell(Arc::clone(&server), Box::new(SqliteKvStore::open(&path).unwrap()));
            walk_to_preview(&mut shell).await;
            shell
                .dispatch(Event::NetworkStatusChanged { online: false })
                .await;
            shell.dispatch(Event::SubmitRequested).await;
            assert!(matches!(
                shell.view().wizard.outcome,
                Some(Outcome::Queued { .. })
            ));
        }

        let store = SqliteKvStore::open(&path).unwrap();
        let stored = store.execute(KeyValueOperation::Get {
            key: KvKey::offline_queue().raw(),
        });
        let KeyValueResult::Ok {
            response: KeyValueResponse::Get {
                value: Value::Bytes(bytes),
            },
        } = stored
        else {
            panic!("queue not stored");
        };
        let queue = OfflineQueue::from_bytes(&bytes).unwrap();
        assert_eq!(queue.len(), 1);
        let entry = queue.iter().next().unwrap();
        assert_eq!(entry.sync_status, SyncStatus::Pending);
        assert_eq!(entry.submission.category.category(), Category::StreetLight);
    }

    #[tokio::test]
    async fn unreachable_server_still_reaches_preview() {
        let server = Arc::new(StubServer {
            offline: true,
            ..StubServer::default()
        });
        let mut shell = shell(server, Box::new(MemoryKvStore::default()));
        shell.dispatch(Event::WizardOpened).await;
        shell.dispatch(Event::ConsentAccepted).await;
        shell
            .dispatch(Event::PhotoSelected(Box::new(ImageSource::Bytes(gradient_png(
                64, 64,
            )))))
            .await;
        shell.dispatch(Event::ProceedToClassify).await;

        let view = shell.view();
        assert!(view.wizard.classification_error.is_some());
        assert!(view.wizard.needs_category_override);
        assert!(view.wizard.can_retry_classification);

        shell
            .dispatch(Event::CategoryOverridden {
                category: Category::DamagedRoad,
            })
            .await;
        shell.dispatch(Event::ProceedToDetails).await;
        assert!(shell.view().wizard.location.is_some());
        assert_eq!(shell.view().wizard.address, None);
    }

    #[tokio::test]
    async fn denied_location_is_reported() {
        let mut shell = Shell::new(
            config(),
            Arc::new(StubServer::default()),
            Box::new(MemoryKvStore::default()),
            Box::new(NoLocation::new(GeoError::PermissionDenied)),
        );
        shell.dispatch(Event::ConsentAccepted).await;
        shell
            .dispatch(Event::PhotoSelected(Box::new(ImageSource::Bytes(gradient_png(
                64, 64,
            )))))
            .await;
        shell.dispatch(Event::ProceedToClassify).await;
        shell.dispatch(Event::ProceedToDetails).await;

        let view = shell.view();
        assert!(view.wizard.location.is_none());
        assert!(view.wizard.location_needs_settings);
        assert!(!view.wizard.can_go_next);
    }

    #[tokio::test]
    async fn invalid_config_is_reported_and_defaults_kept() {
        let bad = ClientConfig {
            api_base_url: "ftp://grievance.example.org".into(),
            ..ClientConfig::default()
        };
        let shell = Shell::new(
            bad,
            Arc::new(StubServer::default()),
            Box::new(MemoryKvStore::default()),
            Box::new(NoLocation::new(GeoError::Timeout)),
        );
        assert!(shell.view().error.is_some());
        assert_eq!(shell.view().wizard.step, WizardStep::Consent);
    }

    #[tokio::test]
    async fn requests_carry_the_configured_host() {
        let server = Arc::new(StubServer::default());
        let mut shell = shell(Arc::clone(&server), Box::new(MemoryKvStore::default()));
        walk_to_preview(&mut shell).await;
        let seen = server.seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen
            .iter()
            .all(|url| url.starts_with("https://grievance.example.org/api/")));
    }
}
