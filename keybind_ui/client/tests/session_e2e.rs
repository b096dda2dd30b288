use analog_backend_mock::{BackgroundBackend, ScriptedDevice};
use keybind_client::sync_core::capture::CaptureState;
use keybind_client::sync_core::protocol::{Channel, KeyBinding};
use keybind_client::{AppState, ClientConfig, Session};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn start_backend() -> (BackgroundBackend, Arc<ScriptedDevice>, ClientConfig) {
    let device = Arc::new(ScriptedDevice::new());
    let backend = BackgroundBackend::start("127.0.0.1:0", Arc::clone(&device), Duration::from_millis(10))
        .expect("spawn backend");
    let config = ClientConfig {
        ws_url: Url::parse(&format!("ws://{}", backend.listen_addr())).unwrap(),
        ..ClientConfig::default()
    };
    (backend, device, config)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_syncs_config_and_devices() {
    let (_backend, _device, config) = start_backend();
    let state = AppState::start(&config);
    let session = Session::attach(&state, &config);

    assert!(
        session
            .wait_until(Duration::from_secs(3), |s| s.settings().is_some()
                && !s.port_options().is_empty()
                && !s.connected_devices().is_empty())
            .await,
        "settings, ports and devices should arrive"
    );

    session.select_port(1).await.expect("select port");
    assert!(session.port_options()[1].selected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn captured_key_is_bound_and_persisted() {
    let (_backend, device, config) = start_backend();
    let state = AppState::start(&config);
    let session = Session::attach(&state, &config);
    assert!(
        session
            .wait_until(Duration::from_secs(3), |s| s.settings().is_some())
            .await
    );

    session.begin_capture(67, 0u8);
    device.set_value(64, 0.8);

    let bound = |s: &Session| {
        s.capture_state() == CaptureState::Idle
            && s
                .settings()
                .and_then(|cfg| cfg.mapping(Channel::default()).cloned())
                .is_some_and(|m| m.contains(&KeyBinding::new(64, 67)))
    };
    assert!(session.wait_until(Duration::from_secs(3), bound).await);

    // The new mapping round-trips through the backend.
    let persisted = async {
        loop {
            let cfg = session.backend().get_config().await.expect("get config");
            if cfg
                .mapping(Channel::default())
                .is_some_and(|m| m.contains(&KeyBinding::new(64, 67)))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(3), persisted)
        .await
        .expect("mapping persisted");
}
