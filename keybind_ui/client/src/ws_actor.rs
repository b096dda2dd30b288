use crate::app_state::{Bridges, ReplyTx, Request, UiCommand};
use crate::error::ClientError;
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use sync_core::protocol::{AppSettings, ClientCommand, ServerMessage};
use sync_core::service_state::ServiceAction;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type Pending = HashMap<u64, Vec<ReplyTx>>;

pub async fn run(mut rx: mpsc::Receiver<UiCommand>, bridges: Bridges, url: Url) {
    let mut desired_connected = true;
    let mut backoff = Backoff::default();
    let mut backlog: VecDeque<UiCommand> = VecDeque::new();
    let mut next_request_id: u64 = 1;

    loop {
        if !desired_connected {
            tracing::info!("backend link disconnected");
            match recv_or_backlog(&mut rx, &mut backlog).await {
                Some(UiCommand::Connect) => desired_connected = true,
                Some(UiCommand::Disconnect) => {}
                Some(UiCommand::Request { reply, .. }) => {
                    let _ = reply.send(Err(ClientError::Disconnected));
                }
                None => return,
            }
            continue;
        }

        tracing::debug!(%url, "connecting to backend");
        let socket = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                backoff.reset();
                tracing::info!(%url, "connected to backend");
                socket
            }
            Err(err) => {
                let retry = backoff.next_delay();
                tracing::warn!(%err, retry_in = retry.as_secs(), "backend connect failed");
                let sleep = tokio::time::sleep(retry);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        next = recv_or_backlog(&mut rx, &mut backlog) => match next {
                            Some(UiCommand::Connect) => {}
                            Some(UiCommand::Disconnect) => { desired_connected = false; break; }
                            Some(UiCommand::Request { reply, .. }) => {
                                let _ = reply.send(Err(ClientError::Disconnected));
                            }
                            None => return,
                        },
                    }
                }
                continue;
            }
        };

        let (mut write, mut read) = socket.split();
        let mut pending: Pending = HashMap::new();

        'conn: loop {
            tokio::select! {
                next = recv_or_backlog(&mut rx, &mut backlog) => {
                    let Some(cmd) = next else { return };
                    match cmd {
                        UiCommand::Connect => {}
                        UiCommand::Disconnect => { desired_connected = false; break 'conn; }
                        UiCommand::Request { request, reply } => {
                            let (request, repliers) = match request {
                                Request::UpdateConfig { settings } => {
                                    coalesce_update_config(settings, reply, &mut rx, &mut backlog)
                                }
                                other => (other, vec![reply]),
                            };
                            let request_id = next_request_id;
                            next_request_id += 1;
                            let cmd = request.into_command(request_id);
                            if send_raw(&mut write, &cmd).await.is_err() {
                                fail_all(repliers, ClientError::Disconnected);
                                break 'conn;
                            }
                            pending.insert(request_id, repliers);
                        }
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => handle_text(&text, &bridges, &mut pending),
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break 'conn,
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        for (_, repliers) in pending.drain() {
            fail_all(repliers, ClientError::Disconnected);
        }
        tracing::info!("backend connection closed");
    }
}

fn handle_text(text: &str, bridges: &Bridges, pending: &mut Pending) {
    let msg = match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::warn!(%err, "dropping undecodable backend message");
            return;
        }
    };

    match msg {
        ServerMessage::InitComplete => bridges.fire_init(),
        ServerMessage::ConfigLoaded { settings } => bridges.dispatch_settings(settings),
        ServerMessage::Reply { request_id, reply } => match pending.remove(&request_id) {
            Some(repliers) => {
                for tx in repliers {
                    let _ = tx.send(Ok(reply.clone()));
                }
            }
            None => tracing::debug!(request_id, "reply for unknown request"),
        },
        ServerMessage::Error {
            request_id,
            msg,
            code,
        } => {
            let repliers = request_id.and_then(|id| pending.remove(&id));
            match repliers {
                Some(repliers) => fail_all(repliers, ClientError::Backend { code, msg }),
                None => tracing::warn!(?code, %msg, "backend error"),
            }
        }
        other => match ServiceAction::from_server_message(other) {
            Ok(action) => bridges.dispatch_service(action),
            Err(msg) => tracing::warn!(?msg, "unhandled backend message"),
        },
    }
}

fn fail_all(repliers: Vec<ReplyTx>, err: ClientError) {
    for tx in repliers {
        let _ = tx.send(Err(err.clone()));
    }
}

/// Folds back-to-back config pushes into one; every caller gets the result
/// of the last.
fn coalesce_update_config(
    first: AppSettings,
    reply: ReplyTx,
    rx: &mut mpsc::Receiver<UiCommand>,
    backlog: &mut VecDeque<UiCommand>,
) -> (Request, Vec<ReplyTx>) {
    let mut last = first;
    let mut repliers = vec![reply];

    while let Ok(next) = rx.try_recv() {
        match next {
            UiCommand::Request {
                request: Request::UpdateConfig { settings },
                reply,
            } => {
                last = settings;
                repliers.push(reply);
            }
            other => {
                backlog.push_back(other);
                break;
            }
        }
    }

    if repliers.len() > 1 {
        tracing::debug!(count = repliers.len(), "coalesced config updates");
    }
    (Request::UpdateConfig { settings: last }, repliers)
}

async fn send_raw(write: &mut WsSink, cmd: &ClientCommand) -> Result<(), ()> {
    let payload = serde_json::to_string(cmd).map_err(|_| ())?;
    write
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn recv_or_backlog(
    rx: &mut mpsc::Receiver<UiCommand>,
    backlog: &mut VecDeque<UiCommand>,
) -> Option<UiCommand> {
    if let Some(cmd) = backlog.pop_front() {
        return Some(cmd);
    }
    rx.recv().await
}

#[derive(Default)]
struct Backoff {
    idx: usize,
}

impl Backoff {
    fn reset(&mut self) {
        self.idx = 0;
    }

    fn next_delay(&mut self) -> Duration {
        let delays = [1, 2, 5, 10];
        let secs = delays.get(self.idx).copied().unwrap_or(10);
        self.idx = (self.idx + 1).min(delays.len());
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::protocol::{DeviceSnapshot, ErrorCode, Reply};
    use tokio::sync::oneshot;

    #[test]
    fn backoff_steps_then_saturates() {
        let mut b = Backoff::default();
        let secs: Vec<u64> = (0..6).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 5, 10, 10, 10]);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn consecutive_config_pushes_coalesce() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backlog = VecDeque::new();

        let mut shifted = AppSettings::default();
        shifted.shift_amount = 24;
        let (r2, _rx2) = oneshot::channel();
        tx.send(UiCommand::Request {
            request: Request::UpdateConfig {
                settings: shifted.clone(),
            },
            reply: r2,
        })
        .await
        .unwrap();
        let (r3, _rx3) = oneshot::channel();
        tx.send(UiCommand::Request {
            request: Request::GetConfig,
            reply: r3,
        })
        .await
        .unwrap();

        let (r1, _rx1) = oneshot::channel();
        let (request, repliers) =
            coalesce_update_config(AppSettings::default(), r1, &mut rx, &mut backlog);
        assert_eq!(request, Request::UpdateConfig { settings: shifted });
        assert_eq!(repliers.len(), 2);
        assert!(matches!(
            backlog.pop_front(),
            Some(UiCommand::Request {
                request: Request::GetConfig,
                ..
            })
        ));
    }

    #[test]
    fn replies_and_errors_reach_their_callers() {
        let bridges = Bridges::new();
        let mut pending: Pending = HashMap::new();
        let (ok_tx, mut ok_rx) = oneshot::channel();
        let (err_tx, mut err_rx) = oneshot::channel();
        pending.insert(7, vec![ok_tx]);
        pending.insert(8, vec![err_tx]);

        handle_text(r#"{"type":"reply","request_id":7,"reply":{"kind":"ack"}}"#, &bridges, &mut pending);
        handle_text(
            r#"{"type":"error","request_id":8,"msg":"no such port","code":"invalid_port"}"#,
            &bridges,
            &mut pending,
        );

        assert_eq!(ok_rx.try_recv().unwrap(), Ok(Reply::Ack));
        assert_eq!(
            err_rx.try_recv().unwrap(),
            Err(ClientError::Backend {
                code: ErrorCode::InvalidPort,
                msg: "no such port".to_string()
            })
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn pushes_queue_until_a_consumer_attaches() {
        let bridges = Bridges::new();
        let mut pending: Pending = HashMap::new();
        handle_text(r#"{"type":"no_devices"}"#, &bridges, &mut pending);
        handle_text("not json", &bridges, &mut pending);
        handle_text(r#"{"type":"midi_snapshot","snapshot":{}}"#, &bridges, &mut pending);

        let service = bridges.service.lock().unwrap();
        assert_eq!(service.queued_len(), 2);
        drop(service);

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        bridges
            .service
            .lock()
            .unwrap()
            .attach(move |a: ServiceAction| sink.lock().unwrap().push(a));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ServiceAction::NoDevices,
                ServiceAction::MidiUpdate(DeviceSnapshot::default())
            ]
        );
    }
}
