use crate::protocol::{ClientCommand, ErrorCode, InboundMsg, OutboundMsg, ServerMessage};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::protocol::Message;
use tungstenite::WebSocket;

pub const DEFAULT_ADDR: &str = "127.0.0.1:9002";

const READ_TIMEOUT: Duration = Duration::from_millis(30);
const WRITE_TIMEOUT: Duration = Duration::from_millis(200);
const IDLE_SLEEP: Duration = Duration::from_millis(25);

/// Owns the listening socket thread. Dropping it stops the thread.
pub struct NetworkThread {
    stop: Arc<AtomicBool>,
    listen_addr: SocketAddr,
    join_handle: Option<JoinHandle<()>>,
}

impl NetworkThread {
    pub fn spawn(in_tx: Sender<InboundMsg>, out_rx: Receiver<OutboundMsg>) -> io::Result<Self> {
        Self::spawn_with_addr(DEFAULT_ADDR, in_tx, out_rx)
    }

    /// Binds before returning, so `listen_addr` is valid right away. Port 0
    /// picks a free port.
    pub fn spawn_with_addr(
        addr: &str,
        in_tx: Sender<InboundMsg>,
        out_rx: Receiver<OutboundMsg>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let listen_addr = listener.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let mut server = Server {
            listener,
            in_tx,
            out_rx,
            client: None,
            stop: Arc::clone(&stop),
        };
        let join_handle = thread::spawn(move || server.run());

        tracing::info!(%listen_addr, "backend listening");
        Ok(Self {
            stop,
            listen_addr,
            join_handle: Some(join_handle),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NetworkThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Client {
    ws: WebSocket<TcpStream>,
    addr: SocketAddr,
}

/// One client at a time; a newer connection takes over from the current one.
struct Server {
    listener: TcpListener,
    in_tx: Sender<InboundMsg>,
    out_rx: Receiver<OutboundMsg>,
    client: Option<Client>,
    stop: Arc<AtomicBool>,
}

impl Server {
    fn run(&mut self) {
        while !self.stop.load(Ordering::Relaxed) {
            self.accept_pending();
            if !self.flush_outbound() {
                break;
            }
            if self.client.is_some() {
                self.read_one();
            } else {
                thread::sleep(IDLE_SLEEP);
            }
        }
        if let Some(mut client) = self.client.take() {
            let _ = client.ws.close(None);
        }
    }

    fn accept_pending(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    return;
                }
            };
            match handshake(stream) {
                Ok(ws) => self.adopt(Client { ws, addr }),
                Err(e) => tracing::warn!(%addr, "websocket handshake failed: {e}"),
            }
        }
    }

    fn adopt(&mut self, mut client: Client) {
        if self.client.is_some() {
            self.drop_client("replaced by a newer connection");
        }
        let greeting = InboundMsg::ClientConnected {
            socket_addr: client.addr,
        };
        if self.in_tx.try_send(greeting).is_err() {
            let _ = send_message(&mut client.ws, &busy(None));
            let _ = client.ws.close(None);
            return;
        }
        tracing::info!(addr = %client.addr, "client connected");
        self.client = Some(client);
    }

    fn drop_client(&mut self, reason: &str) {
        if let Some(mut client) = self.client.take() {
            tracing::info!(addr = %client.addr, "client dropped: {reason}");
            let _ = client.ws.close(None);
            let _ = self.in_tx.try_send(InboundMsg::ClientDisconnected);
        }
    }

    /// Returns false once the main loop has gone away.
    fn flush_outbound(&mut self) -> bool {
        loop {
            let msg = match self.out_rx.try_recv() {
                Ok(OutboundMsg::Send { msg }) => msg,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            };
            // Messages queued with nobody connected are discarded.
            let Some(client) = self.client.as_mut() else {
                continue;
            };
            if send_message(&mut client.ws, &msg).is_err() {
                self.drop_client("send failed");
            }
        }
    }

    fn read_one(&mut self) {
        let Some(client) = self.client.as_mut() else {
            return;
        };
        let text = match client.ws.read() {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return self.drop_client("closed by peer"),
            Ok(_) => return,
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                return
            }
            Err(e) => return self.drop_client(&e.to_string()),
        };

        let cmd = match serde_json::from_str::<ClientCommand>(&text) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!("undecodable command: {e}");
                let reply = ServerMessage::Error {
                    request_id: None,
                    msg: "invalid json".to_string(),
                    code: ErrorCode::InvalidCommand,
                };
                let _ = send_message(&mut client.ws, &reply);
                return;
            }
        };
        let request_id = cmd.request_id();
        if self.in_tx.try_send(InboundMsg::Command { cmd }).is_err() {
            let _ = send_message(&mut client.ws, &busy(Some(request_id)));
        }
    }
}

fn handshake(stream: TcpStream) -> Result<WebSocket<TcpStream>, String> {
    stream.set_nonblocking(false).map_err(|e| e.to_string())?;
    let _ = stream.set_nodelay(true);
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(|e| e.to_string())?;
    stream
        .set_write_timeout(Some(WRITE_TIMEOUT))
        .map_err(|e| e.to_string())?;
    tungstenite::accept(stream).map_err(|e| e.to_string())
}

fn busy(request_id: Option<u64>) -> ServerMessage {
    ServerMessage::Error {
        request_id,
        msg: "server busy".to_string(),
        code: ErrorCode::Busy,
    }
}

fn send_message(ws: &mut WebSocket<TcpStream>, msg: &ServerMessage) -> Result<(), tungstenite::Error> {
    let payload = serde_json::to_string(msg).map_err(|e| {
        tungstenite::Error::Io(io::Error::new(io::ErrorKind::InvalidData, e))
    })?;
    ws.send(Message::Text(payload))
}
