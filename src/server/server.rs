//! High-level camera API.
//!
//! Provides `CameraServer<S>`, the listening endpoint that authenticates one
//! client at a time and streams frames to it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::session;
use crate::config::{JsonFileStore, ProtocolConfig, StoredCredential};
use crate::core::{ConfigStore, Settings, StoreError};
use crate::crypto::{BcryptHasher, CredentialHasher};
use crate::transport::{ConnectionId, ConnectionIds, FramePayload};

/// Errors that can occur when starting or driving the camera.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Failed to bind to address.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// The credential store could not be read.
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    /// No credential store was configured.
    #[error("no credential store configured")]
    MissingStore,
}

/// Camera configuration.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,

    /// Protocol tunables.
    pub protocol: ProtocolConfig,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            protocol: ProtocolConfig::default(),
        }
    }
}

/// Builder for creating a `CameraServer`.
pub struct CameraServerBuilder<S: Settings> {
    config: CameraConfig,
    settings: S,
    store: Option<Arc<dyn ConfigStore<StoredCredential>>>,
    hasher: Arc<dyn CredentialHasher>,
}

impl<S: Settings> CameraServerBuilder<S> {
    /// Create a builder; `settings` is handed to every authenticated peer.
    pub fn new(settings: S) -> Self {
        Self {
            config: CameraConfig::default(),
            settings,
            store: None,
            hasher: Arc::new(BcryptHasher::default()),
        }
    }

    /// Set the listening address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the protocol tunables.
    pub fn protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Use a custom credential store.
    pub fn credential_store(mut self, store: impl ConfigStore<StoredCredential>) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Store the credential hash as `{"hash": ...}` in a JSON file.
    pub fn credential_file(self, path: impl Into<PathBuf>) -> Self {
        self.credential_store(JsonFileStore::<StoredCredential>::new(path))
    }

    /// Use a custom password hasher.
    pub fn hasher(mut self, hasher: impl CredentialHasher) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    /// Load the credential, bind the listener and start accepting peers.
    pub async fn bind(
        self,
    ) -> Result<(CameraServer<S>, mpsc::UnboundedReceiver<CameraEvent<S>>), CameraError> {
        CameraServer::bind(self.config, self.settings, self.store, self.hasher).await
    }
}

/// Event from the camera.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent<S> {
    /// A peer authenticated and frames now flow to it.
    Ready,
    /// The peer sent new settings.
    Settings(S),
}

/// Per-connection command from the application.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Encrypt and queue a frame.
    QueueFrame(FramePayload),
}

/// Instruction for the listener task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    /// Close everything, wait, then listen again.
    Restart,
    /// Close everything for good.
    Stop,
}

/// The authenticated peer bound to the camera.
#[derive(Debug)]
struct ActivePeer {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl ActivePeer {
    fn is_live(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// State shared between the camera handle, its listener and its sessions.
pub(crate) struct CameraShared<S: Settings> {
    pub(crate) config: ProtocolConfig,
    pub(crate) settings: watch::Sender<S>,
    pub(crate) credential: watch::Sender<String>,
    pub(crate) store: Arc<dyn ConfigStore<StoredCredential>>,
    pub(crate) hasher: Arc<dyn CredentialHasher>,
    pub(crate) ids: ConnectionIds,
    events: mpsc::UnboundedSender<CameraEvent<S>>,
    control: mpsc::UnboundedSender<Control>,
    active: Mutex<Option<ActivePeer>>,
}

impl<S: Settings> CameraShared<S> {
    fn slot(&self) -> MutexGuard<'_, Option<ActivePeer>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `id` as the active peer unless another live peer holds the slot.
    pub(crate) fn claim(
        &self,
        id: ConnectionId,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> bool {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|peer| peer.id != id && peer.is_live()) {
            return false;
        }
        *slot = Some(ActivePeer { id, commands });
        true
    }

    /// Free the slot if `id` holds it.
    pub(crate) fn release(&self, id: ConnectionId) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|peer| peer.id == id) {
            *slot = None;
        }
    }

    fn clear(&self) {
        self.slot().take();
    }

    fn has_peer(&self) -> bool {
        self.slot().as_ref().is_some_and(ActivePeer::is_live)
    }

    fn send_to_peer(&self, command: SessionCommand) {
        let slot = self.slot();
        match slot.as_ref() {
            Some(peer) => {
                if peer.commands.send(command).is_err() {
                    trace!(id = %peer.id, "peer gone, frame dropped");
                }
            }
            None => trace!("no authenticated peer, frame dropped"),
        }
    }

    pub(crate) fn emit(&self, event: CameraEvent<S>) {
        if self.events.send(event).is_err() {
            trace!("camera event receiver dropped");
        }
    }

    pub(crate) fn request_restart(&self) {
        if self.control.send(Control::Restart).is_err() {
            trace!("listener already gone");
        }
    }
}

/// A camera endpoint.
///
/// Generic over the settings type `S` handed to authenticated clients.
///
/// # Example
///
/// ```ignore
/// use camlink::server::{CameraEvent, CameraServerBuilder};
///
/// let (camera, mut events) = CameraServerBuilder::new(my_settings)
///     .bind_addr("0.0.0.0:8080".parse()?)
///     .credential_file("camera.json")
///     .bind()
///     .await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         CameraEvent::Ready => println!("client connected"),
///         CameraEvent::Settings(new) => camera.set_settings(new),
///     }
/// }
///
/// // From the capture loop:
/// camera.queue_frame(jpeg_bytes, captured_at, motion);
/// ```
pub struct CameraServer<S: Settings> {
    shared: Arc<CameraShared<S>>,
    local_addr: SocketAddr,
    control: mpsc::UnboundedSender<Control>,
    task: Option<JoinHandle<()>>,
}

impl<S: Settings> CameraServer<S> {
    /// Start building a camera.
    pub fn builder(settings: S) -> CameraServerBuilder<S> {
        CameraServerBuilder::new(settings)
    }

    async fn bind(
        config: CameraConfig,
        settings: S,
        store: Option<Arc<dyn ConfigStore<StoredCredential>>>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CameraEvent<S>>), CameraError> {
        let store = store.ok_or(CameraError::MissingStore)?;
        let credential = store.load()?;

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(CameraError::BindFailed)?;
        let local_addr = listener.local_addr().map_err(CameraError::BindFailed)?;
        info!(addr = %local_addr, "camera listening");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(CameraShared {
            config: config.protocol,
            settings: watch::Sender::new(settings),
            credential: watch::Sender::new(credential.hash),
            store,
            hasher,
            ids: ConnectionIds::new(),
            events: event_tx,
            control: control_tx.clone(),
            active: Mutex::new(None),
        });

        let task = tokio::spawn(supervise(listener, local_addr, shared.clone(), control_rx));

        let server = Self {
            shared,
            local_addr,
            control: control_tx,
            task: Some(task),
        };
        Ok((server, event_rx))
    }

    /// Address the camera listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue a frame for the authenticated peer.
    ///
    /// Silently dropped when no peer is authenticated.
    pub fn queue_frame(&self, frame: impl Into<Vec<u8>>, timestamp: u64, motion: bool) {
        let payload = FramePayload::new(frame.into(), timestamp, motion);
        self.shared.send_to_peer(SessionCommand::QueueFrame(payload));
    }

    /// Replace the settings handed to future peers.
    pub fn set_settings(&self, settings: S) {
        self.shared.settings.send_replace(settings);
    }

    /// Current settings.
    pub fn settings(&self) -> S {
        self.shared.settings.borrow().clone()
    }

    /// Whether a peer is authenticated.
    pub fn has_peer(&self) -> bool {
        self.shared.has_peer()
    }

    /// Protocol tunables in use.
    pub fn config(&self) -> &ProtocolConfig {
        &self.shared.config
    }

    /// Close every socket and stop listening.
    pub fn stop(&self) {
        if self.control.send(Control::Stop).is_err() {
            trace!("camera already stopped");
        }
    }

    /// Stop and wait for the listener task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "camera task failed");
            }
        }
    }
}

impl<S: Settings> Drop for CameraServer<S> {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Stop);
    }
}

/// Accept peers until stopped, rebinding after every password rotation.
async fn supervise<S: Settings>(
    mut listener: TcpListener,
    addr: SocketAddr,
    shared: Arc<CameraShared<S>>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    loop {
        let generation = CancellationToken::new();
        let outcome = accept_loop(&listener, &shared, &generation, &mut control).await;

        generation.cancel();
        drop(listener);
        shared.clear();

        if outcome == Control::Stop {
            info!(%addr, "camera stopped");
            return;
        }

        info!(%addr, delay = ?shared.config.restart_delay, "restarting listener");
        listener = match rebind(addr, &shared, &mut control).await {
            Some(listener) => listener,
            None => {
                info!(%addr, "camera stopped");
                return;
            }
        };
        info!(%addr, "camera listening");
    }
}

async fn accept_loop<S: Settings>(
    listener: &TcpListener,
    shared: &Arc<CameraShared<S>>,
    generation: &CancellationToken,
    control: &mut mpsc::UnboundedReceiver<Control>,
) -> Control {
    loop {
        tokio::select! {
            command = control.recv() => return command.unwrap_or(Control::Stop),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = shared.ids.next_id();
                    debug!(%peer, %id, "accepted connection");
                    tokio::spawn(session::run(
                        stream,
                        peer,
                        id,
                        shared.clone(),
                        generation.child_token(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

/// Wait out the restart delay and bind again, retrying until it succeeds.
/// Returns `None` when stopped meanwhile.
async fn rebind<S: Settings>(
    addr: SocketAddr,
    shared: &CameraShared<S>,
    control: &mut mpsc::UnboundedReceiver<Control>,
) -> Option<TcpListener> {
    loop {
        tokio::select! {
            command = control.recv() => {
                if matches!(command, Some(Control::Stop) | None) {
                    return None;
                }
            }
            () = tokio::time::sleep(shared.config.restart_delay) => {
                match TcpListener::bind(addr).await {
                    Ok(listener) => return Some(listener),
                    Err(e) => warn!(%addr, error = %e, "rebind failed"),
                }
            }
        }
    }
}
