use std::sync::Arc;

use spool_events::Bus;

use crate::config_loader::BindingsSource;
use crate::history::HistoryLog;
use crate::jobs::JobStore;
use crate::presence::PresenceTracker;
use crate::registry::DeviceRegistry;
use crate::render::{PlaceholderRenderer, ReceiptRenderer, RenderBroker};
use crate::util;

#[derive(Clone)]
pub struct AppState {
    bus: Bus,
    registry: Arc<DeviceRegistry>,
    jobs: Arc<JobStore>,
    presence: Arc<PresenceTracker>,
    history: Arc<HistoryLog>,
    renders: Arc<RenderBroker>,
    bindings: Arc<BindingsSource>,
    endpoints: Arc<Vec<String>>,
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }

    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    pub fn jobs(&self) -> Arc<JobStore> {
        self.jobs.clone()
    }

    pub fn presence(&self) -> Arc<PresenceTracker> {
        self.presence.clone()
    }

    pub fn history(&self) -> Arc<HistoryLog> {
        self.history.clone()
    }

    pub fn renders(&self) -> Arc<RenderBroker> {
        self.renders.clone()
    }

    pub fn bindings(&self) -> Arc<BindingsSource> {
        self.bindings.clone()
    }

    pub fn endpoints(&self) -> Arc<Vec<String>> {
        self.endpoints.clone()
    }
}

#[derive(Default)]
pub struct AppStateBuilder {
    renderer: Option<Arc<dyn ReceiptRenderer>>,
    render_concurrency: Option<usize>,
    bindings: Option<Arc<BindingsSource>>,
    endpoints: Option<Vec<String>>,
    bus_capacity: Option<usize>,
}

impl AppStateBuilder {
    pub fn with_renderer(mut self, renderer: Arc<dyn ReceiptRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_render_concurrency(mut self, concurrency: usize) -> Self {
        self.render_concurrency = Some(concurrency);
        self
    }

    pub fn with_bindings(mut self, bindings: Arc<BindingsSource>) -> Self {
        self.bindings = Some(bindings);
        self
    }

    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> AppState {
        let bus = Bus::new(self.bus_capacity.unwrap_or(256));
        let jobs = JobStore::new();
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(PlaceholderRenderer));
        let concurrency = self
            .render_concurrency
            .unwrap_or_else(util::render_concurrency);
        let renders = RenderBroker::new(renderer, concurrency, jobs.clone(), bus.clone());
        AppState {
            bus,
            registry: DeviceRegistry::new(),
            jobs,
            presence: PresenceTracker::new(),
            history: HistoryLog::new(),
            renders,
            bindings: self.bindings.unwrap_or_else(BindingsSource::from_env),
            endpoints: Arc::new(self.endpoints.unwrap_or_default()),
        }
    }
}
