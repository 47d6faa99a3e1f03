pub mod auth;
pub mod config;
pub mod core;
pub mod feed;
pub mod follow;
pub mod handlers;
pub mod messages;
pub mod models;
pub mod posts;
pub mod presence;
pub mod users;

use chrono::Utc;
use spin_sdk::http::{Request, Response};

use crate::config::Settings;
use crate::core::db::{ensure_indexes, seed_demo_data};
use crate::core::errors::DomainError;
use crate::core::store::DocumentStore;
use crate::presence::LastSeenBuffer;

/// Shared state for request handling: a store, settings and the presence buffer.
pub struct App<S> {
    store: S,
    settings: Settings,
    presence: LastSeenBuffer,
}

impl<S: DocumentStore> App<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        let presence = LastSeenBuffer::new(settings.last_seen_interval_secs);
        Self {
            store,
            settings,
            presence,
        }
    }

    /// Create indexes and, when configured, the demo accounts.
    pub fn bootstrap(&self) -> anyhow::Result<()> {
        ensure_indexes(&self.store)?;
        if self.settings.seed_demo_data {
            seed_demo_data(&self.store, Utc::now())?;
        }
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn presence(&self) -> &LastSeenBuffer {
        &self.presence
    }

    pub fn handle(&self, req: Request) -> Response {
        match handlers::route(self, &req) {
            Ok(resp) => resp,
            Err(err) => {
                log::debug!("{} {} failed: {}", req.method(), req.path(), err);
                err.into()
            }
        }
    }

    /// Write buffered `last_seen` updates.
    pub fn flush_presence(&self) -> Result<usize, DomainError> {
        self.presence.flush(&self.store)
    }
}

#[cfg(target_arch = "wasm32")]
mod component {
    use spin_sdk::http::{IntoResponse, Request};
    use spin_sdk::http_component;

    use crate::config::Settings;
    use crate::core::kv::KvStore;
    use crate::App;

    #[http_component]
    fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
        let app = App::new(KvStore::open_default()?, Settings::from_env());
        app.store().once("bootstrap", env!("CARGO_PKG_VERSION"), || app.bootstrap())?;

        let resp = app.handle(req);
        // instances do not outlive the request
        if let Err(e) = app.flush_presence() {
            log::warn!("last_seen flush failed: {}", e);
        }
        Ok(resp)
    }
}
