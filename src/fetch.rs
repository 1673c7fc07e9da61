//! Fetch scheduling
//!
//! The loader cannot reach the network itself; it queues fetch requests that
//! the host drains and answers with load/error events. The fetcher also owns
//! the "currently loading URL" stack that binds anonymous `define` calls to
//! the script they came from.

use crate::module::{ModuleId, ModuleState};
use crate::registry::Registry;
use std::collections::VecDeque;
use tracing::debug;
use url::Url;

/// Fetch-request queue plus the currently-loading stack.
#[derive(Default)]
pub struct Fetcher {
    requests: VecDeque<Url>,
    loading: Vec<ModuleId>,
}

impl Fetcher {
    /// Create an idle fetcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the host to load a module's script. Only an `Initialized` module
    /// is fetched; one outstanding fetch per URL suffices, so any later
    /// state makes this a no-op.
    pub fn request(&mut self, registry: &mut Registry, id: ModuleId) {
        let module = registry.get_mut(id);
        if module.state != ModuleState::Initialized {
            return;
        }
        module.advance(ModuleState::Loading);
        debug!(url = %module.url, "fetch requested");
        self.requests.push_back(module.url.clone());
    }

    /// Hand the queued request URLs to the host, in issue order. The host
    /// must answer each exactly once with a load or error event.
    pub fn take_requests(&mut self) -> Vec<Url> {
        self.requests.drain(..).collect()
    }

    /// Whether any request is still waiting for the host
    pub fn has_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Enter a script body: its `define` calls bind to `id`
    pub fn push_loading(&mut self, id: ModuleId) {
        self.loading.push(id);
    }

    /// Leave a script body
    pub fn pop_loading(&mut self) -> Option<ModuleId> {
        self.loading.pop()
    }

    /// The module whose script body is executing right now, if any
    pub fn current(&self) -> Option<ModuleId> {
        self.loading.last().copied()
    }

    /// Drop queued requests and the loading stack. Test-only, alongside
    /// registry reset.
    pub fn reset(&mut self) {
        self.requests.clear();
        self.loading.clear();
    }
}
