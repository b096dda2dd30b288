//! UI-facing view of the synchronized state.
//!
//! A `Session` owns one `SyncCore` and the bridge subscriptions that feed it.
//! Locks are always taken bridge first, then core, then the capture timer.

use crate::app_state::{lock, AppState, Bridges};
use crate::backend::BackendHandle;
use crate::config::ClientConfig;
use crate::error::ClientError;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sync_core::active_key::ActiveKey;
use sync_core::bridge::ConsumerId;
use sync_core::capture::{CaptureState, CaptureStep, MouseButton};
use sync_core::piano::PianoView;
use sync_core::protocol::{AppSettings, Channel, DeviceList, DeviceSnapshot, NoteNumber, PortOptions};
use sync_core::service_state::{ServiceAction, ServiceState};
use sync_core::settings::{SettingsAction, SettingsError};
use sync_core::sync::SyncCore;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

type Timer = Arc<Mutex<Option<AbortHandle>>>;

fn notify(changes: &watch::Sender<u64>) {
    changes.send_modify(|n| *n = n.wrapping_add(1));
}

fn stop_timer(timer: &Timer) {
    if let Some(handle) = lock(timer).take() {
        handle.abort();
    }
}

fn devices_action(devices: DeviceList) -> ServiceAction {
    if devices.is_empty() {
        ServiceAction::NoDevices
    } else {
        ServiceAction::FoundDevices(devices)
    }
}

/// Pushes settings to the backend one request at a time, in the order they
/// were produced. A backlog collapses to its newest entry.
fn spawn_config_writer(runtime: &Handle, backend: BackendHandle) -> mpsc::UnboundedSender<AppSettings> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AppSettings>();
    runtime.spawn(async move {
        while let Some(mut latest) = rx.recv().await {
            while let Ok(newer) = rx.try_recv() {
                latest = newer;
            }
            if let Err(err) = backend.update_config(latest).await {
                tracing::warn!(%err, "failed to persist settings");
            }
        }
    });
    tx
}

pub struct Session {
    core: Arc<Mutex<SyncCore>>,
    bridges: Bridges,
    backend: BackendHandle,
    runtime: Handle,
    changes: Arc<watch::Sender<u64>>,
    capture_timer: Timer,
    service_consumer: ConsumerId,
    settings_consumer: ConsumerId,
}

impl Session {
    /// Subscribes to the bridges and starts the initial fetch. Must be called
    /// from inside a tokio runtime.
    pub fn attach(state: &AppState, config: &ClientConfig) -> Self {
        let runtime = Handle::current();
        let backend = state.backend.clone();
        let bridges = state.bridges.clone();

        let mut core = SyncCore::with_capture_timeout(config.capture_timeout);
        let writer = spawn_config_writer(&runtime, backend.clone());
        core.set_settings_sink(move |settings: &AppSettings| {
            if writer.send(settings.clone()).is_err() {
                tracing::warn!("config writer stopped, settings not persisted");
            }
        });
        let core = Arc::new(Mutex::new(core));
        let (changes, _) = watch::channel(0u64);
        let changes = Arc::new(changes);
        let capture_timer: Timer = Arc::new(Mutex::new(None));

        let service_consumer = {
            let core = Arc::clone(&core);
            let changes = Arc::clone(&changes);
            let timer = Arc::clone(&capture_timer);
            lock(&bridges.service).attach(move |action: ServiceAction| {
                let (changed, idle) = {
                    let mut core = lock(&core);
                    let changed = core.apply_service(action, Instant::now());
                    (changed, core.capture_state() == CaptureState::Idle)
                };
                if changed {
                    if idle {
                        stop_timer(&timer);
                    }
                    notify(&changes);
                }
            })
        };

        let settings_consumer = {
            let core = Arc::clone(&core);
            let changes = Arc::clone(&changes);
            lock(&bridges.settings).attach(move |settings: AppSettings| {
                let applied = lock(&core).apply_settings(SettingsAction::Init(settings));
                if applied.is_ok() {
                    notify(&changes);
                }
            })
        };

        let session = Self {
            core,
            bridges,
            backend,
            runtime,
            changes,
            capture_timer,
            service_consumer,
            settings_consumer,
        };
        session.initial_fetch();
        session
    }

    fn initial_fetch(&self) {
        let backend = self.backend.clone();
        let bridges = self.bridges.clone();
        self.runtime.spawn(async move {
            match backend.get_port_options().await {
                Ok(options) => bridges.dispatch_service(ServiceAction::PortOptions(options)),
                Err(err) => tracing::warn!(%err, "initial port fetch failed"),
            }
            match backend.get_connected_devices().await {
                Ok(devices) => bridges.dispatch_service(devices_action(devices)),
                Err(err) => tracing::warn!(%err, "initial device fetch failed"),
            }
        });

        let backend = self.backend.clone();
        let bridges = self.bridges.clone();
        let runtime = self.runtime.clone();
        self.bridges.on_init(Box::new(move || {
            runtime.spawn(async move {
                match backend.get_config().await {
                    Ok(settings) => bridges.dispatch_settings(settings),
                    Err(err) => tracing::warn!(%err, "config request failed"),
                }
            });
        }));
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Resolves once `pred` holds, re-checking after every change.
    pub async fn wait_until<F>(&self, timeout: Duration, mut pred: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        let mut rx = self.changes();
        let wait = async {
            loop {
                if pred(self) {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return pred(self);
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn service_state(&self) -> Arc<ServiceState> {
        Arc::clone(lock(&self.core).service_state())
    }

    pub fn midi_state(&self) -> DeviceSnapshot {
        lock(&self.core).service_state().midi_state.clone()
    }

    pub fn port_options(&self) -> PortOptions {
        lock(&self.core).service_state().port_options.clone()
    }

    pub fn connected_devices(&self) -> DeviceList {
        lock(&self.core).service_state().connected_devices.clone()
    }

    pub fn settings(&self) -> Option<Arc<AppSettings>> {
        lock(&self.core).settings().cloned()
    }

    pub fn active_key(&self) -> Option<ActiveKey> {
        lock(&self.core).active_key().cloned()
    }

    pub fn peak_velocity(&self) -> f32 {
        lock(&self.core).peak_velocity()
    }

    pub fn piano_keys(&self) -> PianoView {
        lock(&self.core).piano_keys()
    }

    pub fn channel(&self) -> Channel {
        lock(&self.core).channel()
    }

    pub fn capture_state(&self) -> CaptureState {
        lock(&self.core).capture_state()
    }

    pub fn dispatch_settings(&self, action: SettingsAction) -> Result<(), SettingsError> {
        lock(&self.core).apply_settings(action)?;
        notify(&self.changes);
        Ok(())
    }

    pub async fn select_port(&self, index: usize) -> Result<(), ClientError> {
        let options = self.backend.select_port(index).await?;
        self.bridges
            .dispatch_service(ServiceAction::PortOptions(options));
        Ok(())
    }

    pub async fn refresh_devices(&self) -> Result<(), ClientError> {
        let devices = self.backend.get_connected_devices().await?;
        self.bridges.dispatch_service(devices_action(devices));
        Ok(())
    }

    /// `button` uses DOM numbering: 0 binds, 2 unbinds.
    pub fn begin_capture(&self, note: NoteNumber, button: impl Into<MouseButton>) -> CaptureStep {
        let step = lock(&self.core).begin_capture(note, button.into(), Instant::now());
        stop_timer(&self.capture_timer);

        if let CaptureStep::Armed { token, deadline } = &step {
            let (token, deadline) = (*token, *deadline);
            let core = Arc::clone(&self.core);
            let changes = Arc::clone(&self.changes);
            let task = self.runtime.spawn(async move {
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                if lock(&core).expire_capture(token) {
                    tracing::debug!("capture timed out");
                    notify(&changes);
                }
            });
            *lock(&self.capture_timer) = Some(task.abort_handle());
        }
        notify(&self.changes);
        step
    }

    pub fn cancel_capture(&self) -> bool {
        let cancelled = lock(&self.core).cancel_capture();
        stop_timer(&self.capture_timer);
        if cancelled {
            notify(&self.changes);
        }
        cancelled
    }

    pub fn set_channel(&self, channel: Channel) {
        lock(&self.core).set_channel(channel);
        notify(&self.changes);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        lock(&self.bridges.service).detach(self.service_consumer);
        lock(&self.bridges.settings).detach(self.settings_consumer);
        stop_timer(&self.capture_timer);
    }
}
