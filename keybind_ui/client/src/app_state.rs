use crate::backend::BackendHandle;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::ws_actor;
use std::sync::{Arc, Mutex, MutexGuard};
use sync_core::bridge::{Callback, DeferredSignal, EventBridge};
use sync_core::protocol::{AppSettings, ClientCommand, Reply};
use sync_core::service_state::ServiceAction;
use tokio::sync::{mpsc, oneshot};

pub type ReplyTx = oneshot::Sender<Result<Reply, ClientError>>;

pub enum UiCommand {
    Connect,
    Disconnect,
    Request { request: Request, reply: ReplyTx },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    GetPortOptions,
    SelectPort { index: usize },
    GetConfig,
    UpdateConfig { settings: AppSettings },
    GetConnectedDevices,
}

impl Request {
    pub fn into_command(self, request_id: u64) -> ClientCommand {
        match self {
            Request::GetPortOptions => ClientCommand::GetPortOptions { request_id },
            Request::SelectPort { index } => ClientCommand::SelectPort { request_id, index },
            Request::GetConfig => ClientCommand::GetConfig { request_id },
            Request::UpdateConfig { settings } => ClientCommand::UpdateConfig {
                request_id,
                settings,
            },
            Request::GetConnectedDevices => ClientCommand::GetConnectedDevices { request_id },
        }
    }
}

/// Recovers the guard from a poisoned lock. Bridges and the core are only
/// mutated by run-to-completion calls, so the data stays consistent.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared mailboxes between the ws actor and whoever renders state.
#[derive(Clone)]
pub struct Bridges {
    pub service: Arc<Mutex<EventBridge<ServiceAction>>>,
    pub settings: Arc<Mutex<EventBridge<AppSettings>>>,
    pub init: Arc<Mutex<DeferredSignal>>,
}

impl Default for Bridges {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridges {
    pub fn new() -> Self {
        Self {
            service: Arc::new(Mutex::new(EventBridge::new("service"))),
            settings: Arc::new(Mutex::new(EventBridge::new("settings"))),
            init: Arc::new(Mutex::new(DeferredSignal::default())),
        }
    }

    pub fn dispatch_service(&self, action: ServiceAction) {
        lock(&self.service).dispatch(action);
    }

    pub fn dispatch_settings(&self, settings: AppSettings) {
        lock(&self.settings).dispatch(settings);
    }

    pub fn fire_init(&self) {
        let waiters = lock(&self.init).fire();
        for cb in waiters {
            cb();
        }
    }

    pub fn on_init(&self, cb: Callback) {
        let late = lock(&self.init).on_fire(cb);
        if let Some(cb) = late {
            cb();
        }
    }
}

pub struct AppState {
    pub backend: BackendHandle,
    pub bridges: Bridges,
}

impl AppState {
    /// Spawns the ws actor on the current tokio runtime.
    pub fn start(config: &ClientConfig) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let bridges = Bridges::new();
        tokio::spawn(ws_actor::run(rx, bridges.clone(), config.ws_url.clone()));
        Self {
            backend: BackendHandle::new(tx, config.request_timeout),
            bridges,
        }
    }
}
