//! Side-effect capabilities.
//!
//! Rendering, HTTP and storage come from Crux. Position fixes, photo
//! compression and timers are ours: each asks the shell for one operation
//! and turns its output into an [`Event`].

mod compress;
mod geolocation;
mod http;
mod kv;
mod timer;

pub use self::compress::Compress;
pub use self::geolocation::Geolocation;
pub use self::http::{
    outcome, FormPart, FormValue, HttpError, HttpOutcome, HttpReply, MultipartForm, ValidatedUrl,
    MAX_REQUEST_BODY_SIZE, TIMEOUT_HEADER,
};
pub use self::kv::{KeyNamespace, KvError, KvKey, KvResult};
pub use self::timer::{Timer, TimerOperation};

pub use crux_core::render::Render;
pub use crux_http::Http;
pub use crux_kv::KeyValue;

use crate::event::Event;

pub type AppHttp = Http<Event>;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub http: Http<Event>,
    pub kv: KeyValue<Event>,
    pub geolocation: Geolocation<Event>,
    pub compress: Compress<Event>,
    pub timer: Timer<Event>,
}

impl Effect {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Render(_) => "render",
            Self::Http(_) => "http",
            Self::KeyValue(_) => "key_value",
            Self::Geolocation(_) => "geolocation",
            Self::Compress(_) => "compress",
            Self::Timer(_) => "timer",
        }
    }
}
