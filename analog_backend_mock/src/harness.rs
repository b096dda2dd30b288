use crate::device_api::ScriptedDevice;
use crate::main_loop::MainLoop;
use crate::net::NetworkThread;
use crate::protocol::{INBOUND_CAP, OUTBOUND_CAP};
use crossbeam_channel::bounded;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Network thread plus a main loop ticking on its own thread.
pub struct BackgroundBackend {
    net: NetworkThread,
    stop: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl BackgroundBackend {
    pub fn start(addr: &str, device: Arc<ScriptedDevice>, tick: Duration) -> io::Result<Self> {
        let (in_tx, in_rx) = bounded(INBOUND_CAP);
        let (out_tx, out_rx) = bounded(OUTBOUND_CAP);
        let net = NetworkThread::spawn_with_addr(addr, in_tx, out_rx)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let join_handle = thread::spawn(move || {
            let mut main_loop = MainLoop::new(in_rx, out_tx);
            while !stop_for_thread.load(Ordering::Relaxed) {
                main_loop.tick(device.as_ref());
                thread::sleep(tick);
            }
        });

        Ok(Self {
            net,
            stop,
            join_handle: Some(join_handle),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.net.listen_addr()
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.join_handle.take() {
            let _ = h.join();
        }
        self.net.shutdown();
    }
}

impl Drop for BackgroundBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
