use crate::app_state::{Request, UiCommand};
use crate::error::ClientError;
use std::time::Duration;
use sync_core::protocol::{AppSettings, DeviceList, PortOptions, Reply};
use tokio::sync::{mpsc, oneshot};

fn reply_kind(reply: &Reply) -> &'static str {
    match reply {
        Reply::PortOptions { .. } => "port_options",
        Reply::Config { .. } => "config",
        Reply::Devices { .. } => "devices",
        Reply::Ack => "ack",
    }
}

/// Async RPC surface of the backend. Each call is one request, never retried.
#[derive(Clone)]
pub struct BackendHandle {
    tx: mpsc::Sender<UiCommand>,
    request_timeout: Duration,
}

impl BackendHandle {
    pub fn new(tx: mpsc::Sender<UiCommand>, request_timeout: Duration) -> Self {
        Self {
            tx,
            request_timeout,
        }
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        self.tx
            .send(UiCommand::Connect)
            .await
            .map_err(|_| ClientError::ActorUnavailable)
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.tx
            .send(UiCommand::Disconnect)
            .await
            .map_err(|_| ClientError::ActorUnavailable)
    }

    async fn request(&self, request: Request) -> Result<Reply, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(UiCommand::Request { request, reply })
            .await
            .map_err(|_| ClientError::ActorUnavailable)?;
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ActorUnavailable),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    pub async fn get_port_options(&self) -> Result<PortOptions, ClientError> {
        match self.request(Request::GetPortOptions).await? {
            Reply::PortOptions { options } => Ok(options),
            other => Err(unexpected("port_options", &other)),
        }
    }

    /// Returns the port list after the switch.
    pub async fn select_port(&self, index: usize) -> Result<PortOptions, ClientError> {
        match self.request(Request::SelectPort { index }).await? {
            Reply::PortOptions { options } => Ok(options),
            other => Err(unexpected("port_options", &other)),
        }
    }

    pub async fn get_config(&self) -> Result<AppSettings, ClientError> {
        match self.request(Request::GetConfig).await? {
            Reply::Config { settings } => Ok(settings),
            other => Err(unexpected("config", &other)),
        }
    }

    pub async fn update_config(&self, settings: AppSettings) -> Result<(), ClientError> {
        match self.request(Request::UpdateConfig { settings }).await? {
            Reply::Ack => Ok(()),
            other => Err(unexpected("ack", &other)),
        }
    }

    pub async fn get_connected_devices(&self) -> Result<DeviceList, ClientError> {
        match self.request(Request::GetConnectedDevices).await? {
            Reply::Devices { devices } => Ok(devices),
            other => Err(unexpected("devices", &other)),
        }
    }
}

fn unexpected(expected: &'static str, got: &Reply) -> ClientError {
    ClientError::UnexpectedReply {
        expected,
        got: reply_kind(got),
    }
}
