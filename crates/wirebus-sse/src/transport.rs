use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use wirebus_core::{Envelope, SessionId, Transport, TransportError, SESSION_ID_KEY};

use crate::config::ServerConfig;
use crate::registry::SessionRegistry;

/// An inbound envelope waiting in the funnel, plus the publisher's
/// acknowledgement slot. The publisher only answers 204 once `recv` has
/// fired the ack.
struct Offer {
    envelope: Envelope,
    ack: oneshot::Sender<()>,
}

/// Many subscribe/publish connections behind one `recv`/`send` bus.
///
/// Inbound: every publish request offers its envelope to a single-slot
/// funnel drained by `recv`. Outbound: `send` reads `metadata["session_id"]`
/// and routes through the [`SessionRegistry`].
pub struct PushTransport {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    inbound_tx: mpsc::Sender<Offer>,
    inbound_rx: Mutex<mpsc::Receiver<Offer>>,
    shutdown: CancellationToken,
}

impl PushTransport {
    pub fn new(config: ServerConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(1);
        Self {
            registry: Arc::new(SessionRegistry::new(config.session_queue_capacity)),
            config,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.registry.count()
    }

    /// Token cancelled by [`PushTransport::shutdown`]. Subscribe streams watch it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// End the bus: pending and future `recv` calls return `Ok(None)`,
    /// subscribe streams close, and waiting publishers give up.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(sessions = self.registry.count(), "push transport shutting down");
        }
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Hand an inbound envelope to whoever is blocked in `recv`.
    ///
    /// Resolves once `recv` has taken it. Dropping the returned future
    /// (the publish request went away) withdraws the offer.
    pub async fn offer(&self, envelope: Envelope) -> Result<(), TransportError> {
        let (ack, acked) = oneshot::channel();
        let offer = Offer { envelope, ack };

        tokio::select! {
            _ = self.shutdown.cancelled() => return Err(TransportError::Closed),
            sent = self.inbound_tx.send(offer) => sent.map_err(|_| TransportError::Closed)?,
        }

        // An ack that is already in wins over a shutdown racing it.
        tokio::select! {
            biased;
            done = acked => done.map_err(|_| TransportError::Closed),
            _ = self.shutdown.cancelled() => Err(TransportError::Closed),
        }
    }
}

/// Pull the routing key out of an outbound envelope.
fn destination(envelope: &Envelope) -> Result<SessionId, TransportError> {
    let metadata = envelope
        .metadata
        .as_ref()
        .ok_or(TransportError::MetadataMissing)?;
    match metadata.get(SESSION_ID_KEY) {
        Some(id) if !id.is_empty() => Ok(SessionId::from_raw(id.clone())),
        _ => Err(TransportError::SessionIdEmpty),
    }
}

#[async_trait]
impl Transport for PushTransport {
    async fn recv(&self) -> Result<Option<Envelope>, TransportError> {
        let mut inbound = self.inbound_rx.lock().await;
        loop {
            let offer = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(None),
                next = inbound.recv() => match next {
                    Some(offer) => offer,
                    None => return Ok(None),
                },
            };

            if offer.ack.send(()).is_ok() {
                return Ok(Some(offer.envelope));
            }
            tracing::debug!(
                message_id = ?offer.envelope.id,
                "publisher cancelled before handoff, discarding envelope"
            );
        }
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let session_id = destination(&envelope)?;
        tracing::trace!(session_id = %session_id, message_id = ?envelope.id, "routing envelope");
        self.registry.route_to(&session_id, envelope)
    }
}
