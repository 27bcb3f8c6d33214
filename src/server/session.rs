//! Camera-side connection task.
//!
//! One task per accepted socket owns everything about that peer: the
//! handshake, the send queue, in-flight records and the three timers
//! (handshake, ack liveness, pacing). Dropping the task drops all of it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::server::{CameraEvent, CameraShared, SessionCommand};
use crate::config::StoredCredential;
use crate::core::{AuthError, LinkError, LinkResult, LivenessError, MIN_WINDOW, Settings};
use crate::crypto::{Handshake, joined, spawn_hash, spawn_verify};
use crate::transport::{
    self, AckOutcome, AcceptedStream, CameraKind, CameraPhase, ClientKind, CongestionController,
    ConnectionId, Message, MessageEncoder, MessageSink, MessageSource, Timer, admit_at_camera,
    arm, expired, unix_millis,
};

type Verification = Option<JoinHandle<Result<(), AuthError>>>;
type Rotation = Option<JoinHandle<Result<String, AuthError>>>;

/// Resolve when `task` finishes, clearing it. Pending forever when empty.
async fn finished<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    let result = match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    };
    *task = None;
    result
}

/// Drive one accepted socket until it closes.
pub(crate) async fn run<S: Settings>(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    shared: Arc<CameraShared<S>>,
    cancel: CancellationToken,
) {
    let deadline = Instant::now() + shared.config.handshake_timeout;

    let accepted = tokio::select! {
        () = cancel.cancelled() => return,
        accepted = tokio::time::timeout_at(deadline, transport::accept(stream)) => accepted,
    };
    let (sink, source) = match accepted {
        Ok(Ok(halves)) => halves,
        Ok(Err(e)) => {
            warn!(%peer, %id, error = %e, "websocket handshake failed");
            return;
        }
        Err(_) => {
            warn!(%peer, %id, "websocket handshake timed out");
            return;
        }
    };

    let (commands_tx, commands) = mpsc::unbounded_channel();
    let congestion = CongestionController::new(&shared.config);
    let mut session = CameraSession {
        id,
        peer,
        shared,
        sink,
        source,
        commands_tx,
        commands,
        phase: CameraPhase::Connected,
        handshake: Handshake::new(),
        encoder: MessageEncoder::new(),
        congestion,
        handshake_timer: Some(Box::pin(tokio::time::sleep_until(deadline))),
        ack_timer: None,
        pacing_timer: None,
        verification: None,
        rotation: None,
    };

    let result = session.drive(&cancel).await;
    session.close(result, &cancel).await;
}

struct CameraSession<S: Settings> {
    id: ConnectionId,
    peer: SocketAddr,
    shared: Arc<CameraShared<S>>,
    sink: MessageSink<AcceptedStream>,
    source: MessageSource<AcceptedStream>,
    commands_tx: mpsc::UnboundedSender<SessionCommand>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    phase: CameraPhase,
    handshake: Handshake,
    encoder: MessageEncoder<CameraKind>,
    congestion: CongestionController,
    handshake_timer: Timer,
    ack_timer: Timer,
    pacing_timer: Timer,
    verification: Verification,
    rotation: Rotation,
}

impl<S: Settings> CameraSession<S> {
    async fn drive(&mut self, cancel: &CancellationToken) -> LinkResult<()> {
        let auth0 = self.handshake.auth0_payload();
        self.send(CameraKind::Auth0, auth0).await?;
        self.phase = CameraPhase::KeyExchangeSent;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                inbound = self.source.recv() => self.on_message(inbound?).await?,
                Some(command) = self.commands.recv() => self.on_command(command)?,
                () = expired(&mut self.handshake_timer) => {
                    return Err(LivenessError::HandshakeTimeout(self.shared.config.handshake_timeout).into());
                }
                () = expired(&mut self.ack_timer) => {
                    return Err(LivenessError::AckTimeout(self.shared.config.ack_timeout).into());
                }
                () = expired(&mut self.pacing_timer) => {
                    let window = self.congestion.backoff_window();
                    self.send_window(window).await?;
                }
                verified = finished(&mut self.verification) => self.on_verified(verified).await?,
                hashed = finished(&mut self.rotation) => self.on_rotated(hashed)?,
            }
        }
    }

    async fn on_message(&mut self, bytes: Vec<u8>) -> LinkResult<()> {
        let message = Message::<ClientKind>::decode(&bytes)?;
        admit_at_camera(self.phase, message.kind)?;

        match message.kind {
            ClientKind::Auth0 => {
                self.handshake.complete(&message.payload)?;
                self.phase = CameraPhase::SecretComputed;
                trace!(peer = %self.peer, id = %self.id, "connection secret derived");
                self.phase = CameraPhase::AwaitingAuth1;
            }
            ClientKind::Auth1 => {
                let password = self.handshake.open_password(&message.payload)?;
                let hash = self.shared.credential.borrow().clone();
                self.verification = Some(spawn_verify(self.shared.hasher.clone(), password, hash));
                self.phase = CameraPhase::Verifying;
            }
            ClientKind::Ack => self.on_ack(message.id).await?,
            ClientKind::Settings => {
                let settings = self.handshake.open_settings::<S>(&message.payload)?;
                info!(peer = %self.peer, "received new settings");
                self.shared.emit(CameraEvent::Settings(settings));
            }
            ClientKind::Pwd => {
                let password = self.handshake.open_password(&message.payload)?;
                info!(peer = %self.peer, "password rotation requested");
                self.rotation = Some(spawn_hash(self.shared.hasher.clone(), password));
            }
            // Rejected by admission.
            ClientKind::Unknown => {}
        }
        Ok(())
    }

    async fn on_verified(
        &mut self,
        result: Result<Result<(), AuthError>, JoinError>,
    ) -> LinkResult<()> {
        joined(result)?;

        if !self.shared.claim(self.id, self.commands_tx.clone()) {
            return Err(AuthError::Occupied.into());
        }

        let settings = self.shared.settings.borrow().clone();
        let auth1 = self.handshake.seal_settings(&settings)?;
        self.send(CameraKind::Auth1, auth1).await?;

        self.phase = CameraPhase::Ready;
        self.handshake_timer = None;
        self.ack_timer = arm(self.shared.config.ack_timeout);
        self.congestion.reset();
        info!(peer = %self.peer, id = %self.id, "peer authenticated");
        self.shared.emit(CameraEvent::Ready);

        self.send_window(MIN_WINDOW).await
    }

    async fn on_ack(&mut self, id: u32) -> LinkResult<()> {
        self.ack_timer = arm(self.shared.config.ack_timeout);

        if let AckOutcome::Measured { drained: true, .. } = self.congestion.on_ack(id, unix_millis()) {
            let window = self.congestion.next_window();
            self.send_window(window).await?;
        }
        Ok(())
    }

    fn on_command(&mut self, command: SessionCommand) -> LinkResult<()> {
        match command {
            SessionCommand::QueueFrame(frame) => {
                if self.phase != CameraPhase::Ready {
                    return Ok(());
                }
                let envelope = self.handshake.seal(&frame.to_bytes())?;
                self.congestion.queue_frame(envelope);
            }
        }
        Ok(())
    }

    fn on_rotated(
        &mut self,
        result: Result<Result<String, AuthError>, JoinError>,
    ) -> LinkResult<()> {
        let hash = joined(result)?;
        self.shared.store.persist(&StoredCredential { hash: hash.clone() })?;
        self.shared.credential.send_replace(hash);
        info!(peer = %self.peer, "password rotated, restarting camera");
        self.shared.request_restart();
        Ok(())
    }

    async fn send_window(&mut self, count: u32) -> LinkResult<()> {
        let batch = self.congestion.send_window(count, &mut self.encoder, unix_millis());
        self.pacing_timer = arm(self.congestion.rto());
        self.sink.send_all(batch).await?;
        Ok(())
    }

    async fn send(&mut self, kind: CameraKind, payload: Vec<u8>) -> LinkResult<()> {
        let message = self.encoder.encode(kind, payload);
        self.sink.send(message.to_bytes()).await?;
        Ok(())
    }

    /// Tear down: free the slot, finish a pending rotation the client asked
    /// for, close the socket.
    async fn close(mut self, result: LinkResult<()>, cancel: &CancellationToken) {
        self.phase = CameraPhase::Closed;
        self.shared.release(self.id);

        match &result {
            Ok(()) => debug!(peer = %self.peer, id = %self.id, "connection closed"),
            Err(LinkError::Transport(e)) if e.is_close() => {
                info!(peer = %self.peer, id = %self.id, "peer disconnected");
            }
            Err(e) => warn!(
                peer = %self.peer,
                id = %self.id,
                category = ?e.category(),
                error = %e,
                "closing connection"
            ),
        }

        // The client hangs up right after `pwd`; the rotation still completes
        // unless the camera itself is shutting down.
        if let Some(pending) = self.rotation.take() {
            if !cancel.is_cancelled() {
                if let Err(e) = self.on_rotated(pending.await) {
                    warn!(peer = %self.peer, error = %e, "password rotation failed");
                }
            }
        }

        self.sink.close().await;
    }
}
