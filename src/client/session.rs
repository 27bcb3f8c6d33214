//! Client-side connection task.
//!
//! A single task dials the camera, runs one connection to completion and
//! decides when to dial again. After a stop it stays down until the password
//! is changed. Application requests reach it as
//! [`ClientCommand`]s and are answered over a oneshot channel.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::client::{ClientError, ClientEvent, ClientShared};
use crate::config::ClientCredentials;
use crate::core::{LinkError, LinkResult, LivenessError, Settings, StoreError};
use crate::crypto::Handshake;
use crate::transport::{
    self, CameraKind, ClientKind, ClientPhase, DialedStream, FramePayload, Message,
    MessageEncoder, MessageSink, MessageSource, Timer, admit_at_client, arm, expired,
};

type Reply = oneshot::Sender<Result<(), ClientError>>;

/// Request from the client handle.
pub(crate) enum ClientCommand<S> {
    /// Send settings to the camera.
    SetSettings(S, Reply),
    /// Rotate the password.
    SetPassword(Zeroizing<String>, Reply),
    /// Close and stop reconnecting until the next password change.
    Stop,
    /// Close and end the task.
    Shutdown,
}

impl<S> ClientCommand<S> {
    /// Answer a request that cannot be served right now.
    fn reject(self, error: ClientError) {
        match self {
            Self::SetSettings(_, reply) | Self::SetPassword(_, reply) => {
                let _ = reply.send(Err(error));
            }
            Self::Stop | Self::Shutdown => {}
        }
    }
}

/// How a connection or a wait ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Stopped by the application.
    Stopped,
    /// The handle shut down or was dropped.
    Shutdown,
    /// The password was rotated; reconnect after the settle delay.
    Rotated,
}

/// Classify a received command: `Ok` for stop requests, `Err` hands a
/// request back.
fn halt<S>(command: Option<ClientCommand<S>>) -> Result<Exit, ClientCommand<S>> {
    match command {
        None | Some(ClientCommand::Shutdown) => Ok(Exit::Shutdown),
        Some(ClientCommand::Stop) => Ok(Exit::Stopped),
        Some(request) => Err(request),
    }
}

/// What the supervisor does between connections.
enum Wait {
    /// Dial again after the delay.
    Reconnect(Duration),
    /// Stay down until a password change.
    Idle,
}

/// Connect, and reconnect after every close, until shut down.
pub(crate) async fn supervise<S: Settings>(
    shared: Arc<ClientShared<S>>,
    mut commands: mpsc::UnboundedReceiver<ClientCommand<S>>,
) {
    loop {
        let outcome = match shared.store.load() {
            Ok(credentials) => connect_once(&shared, credentials, &mut commands).await,
            Err(e) => Err(e.into()),
        };
        shared.set_phase(ClientPhase::Disconnected).await;

        let exit = match outcome {
            Ok(exit) => Some(exit),
            Err(LinkError::Transport(e)) if e.is_close() => {
                info!("camera closed the connection");
                None
            }
            Err(e) => {
                warn!(category = ?e.category(), error = %e, "connection failed");
                shared.emit(ClientEvent::Error(e));
                None
            }
        };
        shared.emit(ClientEvent::Disconnect);

        let mut wait = match exit {
            None => Wait::Reconnect(reconnect_delay(&shared)),
            Some(Exit::Rotated) => {
                info!(delay = ?shared.config.password_settle_delay, "password rotated, reconnecting");
                Wait::Reconnect(shared.config.password_settle_delay)
            }
            Some(Exit::Stopped) => {
                info!("client stopped");
                Wait::Idle
            }
            Some(Exit::Shutdown) => {
                info!("client shut down");
                return;
            }
        };

        loop {
            wait = match wait {
                Wait::Reconnect(delay) => match pause(delay, &mut commands).await {
                    None => break,
                    Some(Exit::Stopped) => {
                        info!("client stopped");
                        Wait::Idle
                    }
                    Some(_) => {
                        info!("client shut down");
                        return;
                    }
                },
                Wait::Idle => {
                    if !stopped(&shared, &mut commands).await {
                        info!("client shut down");
                        return;
                    }
                    info!(delay = ?shared.config.password_settle_delay, "password changed, reconnecting");
                    Wait::Reconnect(shared.config.password_settle_delay)
                }
            };
        }
    }
}

/// `reconnect_base` plus a uniformly random share of `reconnect_jitter`.
fn reconnect_delay<S: Settings>(shared: &ClientShared<S>) -> Duration {
    let jitter = shared.config.reconnect_jitter.as_millis() as u64;
    let extra = rand::thread_rng().gen_range(0..=jitter);
    shared.config.reconnect_base + Duration::from_millis(extra)
}

/// Sleep for `delay`, refusing requests meanwhile. Returns `None` once the
/// delay elapsed, or the stop request that cut it short.
async fn pause<S>(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<ClientCommand<S>>,
) -> Option<Exit> {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return None,
            command = commands.recv() => match halt(command) {
                Ok(exit) => return Some(exit),
                Err(request) => request.reject(ClientError::NotReady),
            },
        }
    }
}

/// Stay disconnected until a password change rewrites the stored
/// credentials. Returns `false` on shutdown.
async fn stopped<S: Settings>(
    shared: &ClientShared<S>,
    commands: &mut mpsc::UnboundedReceiver<ClientCommand<S>>,
) -> bool {
    loop {
        match halt(commands.recv().await) {
            Ok(Exit::Shutdown) => return false,
            Ok(_) => {}
            Err(ClientCommand::SetPassword(password, reply)) => {
                match rewrite_password(shared, &password) {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                        return true;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to persist the new password");
                        let _ = reply.send(Err(ClientError::Store(e)));
                    }
                }
            }
            Err(request) => request.reject(ClientError::Stopped),
        }
    }
}

/// Replace the stored password, keeping the address.
fn rewrite_password<S: Settings>(shared: &ClientShared<S>, password: &str) -> Result<(), StoreError> {
    let mut record = shared.store.load()?;
    record.pwd = password.to_owned();
    shared.store.persist(&record)
}

/// Run one connection from dialing to close.
async fn connect_once<S: Settings>(
    shared: &ClientShared<S>,
    credentials: ClientCredentials,
    commands: &mut mpsc::UnboundedReceiver<ClientCommand<S>>,
) -> LinkResult<Exit> {
    let ClientCredentials { address, pwd } = credentials;
    let password = Zeroizing::new(pwd);

    shared.set_phase(ClientPhase::Connecting).await;
    debug!(%address, "connecting");

    let (sink, source) = {
        let connecting = transport::connect(&address);
        tokio::pin!(connecting);
        loop {
            tokio::select! {
                connected = &mut connecting => break connected?,
                command = commands.recv() => match halt(command) {
                    Ok(exit) => return Ok(exit),
                    Err(request) => request.reject(ClientError::NotReady),
                },
            }
        }
    };

    let mut session = ClientSession {
        shared,
        address,
        password,
        sink,
        source,
        phase: ClientPhase::Connecting,
        handshake: Handshake::new(),
        encoder: MessageEncoder::new(),
        frame_timer: None,
    };

    let result = session.drive(commands).await;
    session.sink.close().await;
    result
}

struct ClientSession<'a, S: Settings> {
    shared: &'a ClientShared<S>,
    address: String,
    password: Zeroizing<String>,
    sink: MessageSink<DialedStream>,
    source: MessageSource<DialedStream>,
    phase: ClientPhase,
    handshake: Handshake,
    encoder: MessageEncoder<ClientKind>,
    frame_timer: Timer,
}

impl<S: Settings> ClientSession<'_, S> {
    async fn drive(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<ClientCommand<S>>,
    ) -> LinkResult<Exit> {
        let auth0 = self.handshake.auth0_payload();
        self.send(ClientKind::Auth0, auth0).await?;
        self.enter(ClientPhase::KeyExchangeSent).await;

        loop {
            tokio::select! {
                inbound = self.source.recv() => self.on_message(inbound?).await?,
                command = commands.recv() => match halt(command) {
                    Ok(exit) => return Ok(exit),
                    Err(ClientCommand::SetSettings(settings, reply)) => {
                        self.on_set_settings(&settings, reply).await?;
                    }
                    Err(ClientCommand::SetPassword(password, reply)) => {
                        if self.on_set_password(password, reply).await? {
                            return Ok(Exit::Rotated);
                        }
                    }
                    Err(request) => request.reject(ClientError::NotReady),
                },
                () = expired(&mut self.frame_timer) => {
                    return Err(LivenessError::FrameTimeout(self.shared.config.frame_timeout).into());
                }
            }
        }
    }

    async fn on_message(&mut self, bytes: Vec<u8>) -> LinkResult<()> {
        let message = Message::<CameraKind>::decode(&bytes)?;
        admit_at_client(self.phase, message.kind)?;

        match message.kind {
            CameraKind::Auth0 => {
                self.handshake.complete(&message.payload)?;
                self.enter(ClientPhase::SecretComputed).await;
                let auth1 = self.handshake.seal_password(&self.password)?;
                self.send(ClientKind::Auth1, auth1).await?;
                self.enter(ClientPhase::AuthSent).await;
            }
            CameraKind::Auth1 => {
                let settings = self.handshake.open_settings::<S>(&message.payload)?;
                self.shared.settings.send_replace(Some(settings.clone()));
                self.enter(ClientPhase::Ready).await;
                info!(address = %self.address, "authenticated");
                self.shared.emit(ClientEvent::Ready(settings));
            }
            CameraKind::Frame => {
                self.frame_timer = arm(self.shared.config.frame_timeout);
                self.sink.send(Message::ack(message.id).to_bytes()).await?;

                let plaintext = self.handshake.open(&message.payload)?;
                let frame = FramePayload::from_bytes(&plaintext)?;
                self.shared.emit(ClientEvent::Frame {
                    data: frame.data,
                    timestamp: frame.timestamp,
                    motion: frame.motion,
                });
            }
            // Rejected by admission.
            CameraKind::Unknown => {}
        }
        Ok(())
    }

    async fn on_set_settings(&mut self, settings: &S, reply: Reply) -> LinkResult<()> {
        if !self.phase.is_ready() {
            let _ = reply.send(Err(ClientError::NotReady));
            return Ok(());
        }

        let sent = match self.handshake.seal_settings(settings) {
            Ok(envelope) => self.send(ClientKind::Settings, envelope).await,
            Err(e) => Err(e),
        };
        let _ = reply.send(sent.as_ref().map(|_| ()).map_err(|_| ClientError::ConnectionLost));
        sent
    }

    /// Send the new password, then persist it. Returns `true` once the
    /// rotation was handed to the camera and stored; a store failure closes
    /// the connection.
    async fn on_set_password(
        &mut self,
        password: Zeroizing<String>,
        reply: Reply,
    ) -> LinkResult<bool> {
        if !self.phase.is_ready() {
            let _ = reply.send(Err(ClientError::NotReady));
            return Ok(false);
        }

        let sent = match self.handshake.seal_password(&password) {
            Ok(envelope) => self.send(ClientKind::Pwd, envelope).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            let _ = reply.send(Err(ClientError::ConnectionLost));
            return Err(e);
        }

        let record = ClientCredentials {
            address: self.address.clone(),
            pwd: password.as_str().to_owned(),
        };
        if let Err(e) = self.shared.store.persist(&record) {
            let _ = reply.send(Err(ClientError::Persist(e.to_string())));
            return Err(e.into());
        }
        let _ = reply.send(Ok(()));
        Ok(true)
    }

    async fn enter(&mut self, phase: ClientPhase) {
        self.phase = phase;
        self.shared.set_phase(phase).await;
    }

    async fn send(&mut self, kind: ClientKind, payload: Vec<u8>) -> LinkResult<()> {
        let message = self.encoder.encode(kind, payload);
        self.sink.send(message.to_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JsonFileStore, ProtocolConfig};
    use crate::core::ConfigStore;

    fn shared_with_store(
        path: &std::path::Path,
    ) -> (Arc<ClientShared<u8>>, mpsc::UnboundedReceiver<ClientEvent<u8>>) {
        let store = JsonFileStore::<ClientCredentials>::new(path);
        store
            .persist(&ClientCredentials {
                address: "ws://127.0.0.1:9".into(),
                pwd: "old".into(),
            })
            .unwrap();
        let (events, rx) = mpsc::unbounded_channel();
        let shared = ClientShared::new(ProtocolConfig::default(), Arc::new(store), events);
        (Arc::new(shared), rx)
    }

    #[test]
    fn test_reject_answers_requests() {
        let (reply, mut response) = oneshot::channel();
        ClientCommand::SetSettings(1u8, reply).reject(ClientError::NotReady);
        assert!(matches!(response.try_recv(), Ok(Err(ClientError::NotReady))));

        ClientCommand::<u8>::Stop.reject(ClientError::NotReady);
    }

    #[test]
    fn test_halt_classifies_commands() {
        assert_eq!(halt::<u8>(None).ok(), Some(Exit::Shutdown));
        assert_eq!(halt::<u8>(Some(ClientCommand::Shutdown)).ok(), Some(Exit::Shutdown));
        assert_eq!(halt::<u8>(Some(ClientCommand::Stop)).ok(), Some(Exit::Stopped));

        let (reply, _response) = oneshot::channel();
        assert!(halt(Some(ClientCommand::SetSettings(1u8, reply))).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_rejects_then_elapses() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientCommand<u8>>();
        let (reply, response) = oneshot::channel();
        tx.send(ClientCommand::SetPassword(Zeroizing::new("new".into()), reply))
            .unwrap();

        assert_eq!(pause(Duration::from_secs(5), &mut rx).await, None);
        assert!(matches!(response.await, Ok(Err(ClientError::NotReady))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_honors_stop() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientCommand<u8>>();
        tx.send(ClientCommand::Stop).unwrap();
        assert_eq!(pause(Duration::from_secs(5), &mut rx).await, Some(Exit::Stopped));

        tx.send(ClientCommand::Shutdown).unwrap();
        assert_eq!(pause(Duration::from_secs(5), &mut rx).await, Some(Exit::Shutdown));

        drop(tx);
        assert_eq!(pause(Duration::from_secs(5), &mut rx).await, Some(Exit::Shutdown));
    }

    #[tokio::test]
    async fn test_password_change_resumes_stopped_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        let (shared, _events) = shared_with_store(&path);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (settings_reply, settings_response) = oneshot::channel();
        let (password_reply, password_response) = oneshot::channel();
        tx.send(ClientCommand::Stop).unwrap();
        tx.send(ClientCommand::SetSettings(3, settings_reply)).unwrap();
        tx.send(ClientCommand::SetPassword(Zeroizing::new("new".into()), password_reply))
            .unwrap();

        assert!(stopped(&shared, &mut rx).await);
        assert!(matches!(settings_response.await, Ok(Err(ClientError::Stopped))));
        assert!(matches!(password_response.await, Ok(Ok(()))));

        let record = JsonFileStore::<ClientCredentials>::new(&path).load().unwrap();
        assert_eq!(record.pwd, "new");
        assert_eq!(record.address, "ws://127.0.0.1:9");
    }

    #[tokio::test]
    async fn test_stopped_client_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let (shared, _events) = shared_with_store(&dir.path().join("client.json"));
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientCommand<u8>>();

        tx.send(ClientCommand::Shutdown).unwrap();
        assert!(!stopped(&shared, &mut rx).await);

        drop(tx);
        assert!(!stopped(&shared, &mut rx).await);
    }
}
