//! High-level client API.
//!
//! Provides `CameraClient<S>`, the reconnecting endpoint that authenticates
//! to a camera with a stored password and receives its frames.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{trace, warn};
use zeroize::Zeroizing;

use super::session::{self, ClientCommand};
use crate::config::{ClientCredentials, JsonFileStore, ProtocolConfig};
use crate::core::{ConfigStore, LinkError, Settings, StoreError};
use crate::transport::ClientPhase;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client is not authenticated to a camera.
    #[error("client is not ready")]
    NotReady,

    /// The client was stopped.
    #[error("client stopped")]
    Stopped,

    /// The connection failed while the request was in progress.
    #[error("connection lost")]
    ConnectionLost,

    /// The credential store could not be read or written.
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    /// The camera accepted a new password that could not be stored locally.
    #[error("failed to persist the new password: {0}")]
    Persist(String),

    /// No credential store was configured.
    #[error("no credential store configured")]
    MissingStore,
}

/// Event from the client.
#[derive(Debug)]
pub enum ClientEvent<S> {
    /// Authenticated; carries the camera's settings.
    Ready(S),
    /// A frame arrived.
    Frame {
        /// Frame bytes as queued by the camera.
        data: Vec<u8>,
        /// Capture timestamp chosen by the camera.
        timestamp: u64,
        /// Motion flag.
        motion: bool,
    },
    /// The connection closed. A reconnect follows unless stopped.
    Disconnect,
    /// The connection failed.
    Error(LinkError),
}

/// Builder for creating a `CameraClient`.
#[derive(Default)]
pub struct CameraClientBuilder {
    protocol: ProtocolConfig,
    store: Option<Arc<dyn ConfigStore<ClientCredentials>>>,
}

impl CameraClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the protocol tunables.
    pub fn protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    /// Use a custom credential store.
    pub fn credential_store(mut self, store: impl ConfigStore<ClientCredentials>) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Store `{"address": ..., "pwd": ...}` in a JSON file.
    pub fn credential_file(self, path: impl Into<PathBuf>) -> Self {
        self.credential_store(JsonFileStore::<ClientCredentials>::new(path))
    }

    /// Validate the stored credentials and start connecting.
    pub async fn connect<S: Settings>(
        self,
    ) -> Result<(CameraClient<S>, mpsc::UnboundedReceiver<ClientEvent<S>>), ClientError> {
        CameraClient::connect(self.protocol, self.store).await
    }
}

/// State shared between the client handle and its connection task.
pub(crate) struct ClientShared<S: Settings> {
    pub(crate) config: ProtocolConfig,
    pub(crate) store: Arc<dyn ConfigStore<ClientCredentials>>,
    pub(crate) settings: watch::Sender<Option<S>>,
    phase: RwLock<ClientPhase>,
    events: mpsc::UnboundedSender<ClientEvent<S>>,
}

impl<S: Settings> ClientShared<S> {
    pub(crate) fn new(
        config: ProtocolConfig,
        store: Arc<dyn ConfigStore<ClientCredentials>>,
        events: mpsc::UnboundedSender<ClientEvent<S>>,
    ) -> Self {
        Self {
            config,
            store,
            settings: watch::Sender::new(None),
            phase: RwLock::new(ClientPhase::Disconnected),
            events,
        }
    }

    pub(crate) async fn set_phase(&self, phase: ClientPhase) {
        *self.phase.write().await = phase;
    }

    pub(crate) fn emit(&self, event: ClientEvent<S>) {
        if self.events.send(event).is_err() {
            trace!("client event receiver dropped");
        }
    }
}

/// A camera client.
///
/// Generic over the settings type `S` the camera hands out.
///
/// # Example
///
/// ```ignore
/// use camlink::client::{CameraClientBuilder, ClientEvent};
///
/// let (client, mut events) = CameraClientBuilder::new()
///     .credential_file("client.json")
///     .connect::<MySettings>()
///     .await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         ClientEvent::Ready(settings) => println!("connected: {settings:?}"),
///         ClientEvent::Frame { data, timestamp, motion } => show(data, timestamp, motion),
///         ClientEvent::Disconnect => println!("reconnecting"),
///         ClientEvent::Error(e) => eprintln!("{e}"),
///     }
/// }
/// ```
pub struct CameraClient<S: Settings> {
    shared: Arc<ClientShared<S>>,
    commands: mpsc::UnboundedSender<ClientCommand<S>>,
    task: Option<JoinHandle<()>>,
}

impl<S: Settings> CameraClient<S> {
    /// Start building a client.
    pub fn builder() -> CameraClientBuilder {
        CameraClientBuilder::new()
    }

    async fn connect(
        config: ProtocolConfig,
        store: Option<Arc<dyn ConfigStore<ClientCredentials>>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent<S>>), ClientError> {
        let store = store.ok_or(ClientError::MissingStore)?;
        store.load()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(ClientShared::new(config, store, event_tx));

        let task = tokio::spawn(session::supervise(shared.clone(), command_rx));

        let client = Self {
            shared,
            commands: command_tx,
            task: Some(task),
        };
        Ok((client, event_rx))
    }

    /// Current connection phase.
    pub async fn phase(&self) -> ClientPhase {
        *self.shared.phase.read().await
    }

    /// Check if the client is authenticated.
    pub async fn is_ready(&self) -> bool {
        self.phase().await.is_ready()
    }

    /// Settings received at the last authentication.
    pub fn settings(&self) -> Option<S> {
        self.shared.settings.borrow().clone()
    }

    /// Protocol tunables in use.
    pub fn config(&self) -> &ProtocolConfig {
        &self.shared.config
    }

    /// Send new settings to the camera.
    pub async fn set_settings(&self, settings: S) -> Result<(), ClientError> {
        self.request(|reply| ClientCommand::SetSettings(settings, reply))
            .await
    }

    /// Rotate the password.
    ///
    /// The new password is sent to the camera and persisted locally; the
    /// client then disconnects and reconnects with it once the camera had
    /// time to restart. On a stopped client the password is only stored,
    /// and the client starts reconnecting with it.
    pub async fn set_password(&self, password: impl Into<String>) -> Result<(), ClientError> {
        let password = Zeroizing::new(password.into());
        self.request(|reply| ClientCommand::SetPassword(password, reply))
            .await
    }

    async fn request<F>(&self, command: F) -> Result<(), ClientError>
    where
        F: FnOnce(oneshot::Sender<Result<(), ClientError>>) -> ClientCommand<S>,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ClientError::Stopped)?;
        response.await.map_err(|_| ClientError::Stopped)?
    }

    /// Close the connection and stop reconnecting until the next
    /// [`set_password`](Self::set_password).
    pub fn stop(&self) {
        if self.commands.send(ClientCommand::Stop).is_err() {
            trace!("client already shut down");
        }
    }

    /// Close the connection and wait for the connection task to finish.
    pub async fn shutdown(mut self) {
        if self.commands.send(ClientCommand::Shutdown).is_err() {
            trace!("client already shut down");
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "client task failed");
            }
        }
    }
}

impl<S: Settings> Drop for CameraClient<S> {
    fn drop(&mut self) {
        let _ = self.commands.send(ClientCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestSettings {
        quality: u8,
    }

    #[tokio::test]
    async fn test_connect_requires_store() {
        let result = CameraClientBuilder::new().connect::<TestSettings>().await;
        assert!(matches!(result, Err(ClientError::MissingStore)));
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let result = CameraClientBuilder::new()
            .credential_file(dir.path().join("missing.json"))
            .connect::<TestSettings>()
            .await;
        assert!(matches!(result, Err(ClientError::Store(StoreError::Io(_)))));
    }

    #[tokio::test]
    async fn test_requests_rejected_before_ready() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::<ClientCredentials>::new(dir.path().join("client.json"));
        // Nothing listens on port 9 of the loopback.
        store
            .persist(&ClientCredentials {
                address: "ws://127.0.0.1:9".into(),
                pwd: "password".into(),
            })
            .unwrap();

        let (client, _events) = CameraClientBuilder::new()
            .credential_store(store)
            .connect::<TestSettings>()
            .await
            .unwrap();

        assert!(!client.is_ready().await);
        assert!(client.settings().is_none());
        assert!(matches!(
            client.set_settings(TestSettings { quality: 2 }).await,
            Err(ClientError::NotReady)
        ));
        assert!(matches!(
            client.set_password("new").await,
            Err(ClientError::NotReady)
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_stopped_client_takes_new_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        let store = JsonFileStore::<ClientCredentials>::new(&path);
        store
            .persist(&ClientCredentials {
                address: "ws://127.0.0.1:9".into(),
                pwd: "password".into(),
            })
            .unwrap();

        let mut protocol = ProtocolConfig::default();
        protocol.password_settle_delay = std::time::Duration::from_millis(10);
        let (client, mut events) = CameraClientBuilder::new()
            .protocol(protocol)
            .credential_store(store)
            .connect::<TestSettings>()
            .await
            .unwrap();

        client.stop();
        assert!(matches!(
            client.set_settings(TestSettings { quality: 2 }).await,
            Err(ClientError::Stopped)
        ));
        assert_eq!(client.phase().await, ClientPhase::Disconnected);
        while events.try_recv().is_ok() {}

        client.set_password("rotated").await.unwrap();
        let record = JsonFileStore::<ClientCredentials>::new(&path).load().unwrap();
        assert_eq!(record.pwd, "rotated");
        assert_eq!(record.address, "ws://127.0.0.1:9");

        // The supervisor dials again after the settle delay.
        let mut redialed = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_secs(5), events.recv()).await
        {
            if matches!(event, ClientEvent::Error(_)) {
                redialed = true;
                break;
            }
        }
        assert!(redialed);

        client.shutdown().await;
    }
}
