use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::errors::TransportError;

/// Message bus consumed by a protocol dispatcher.
///
/// `recv` yields inbound envelopes from whichever peer produced them and
/// returns `Ok(None)` once the stream has ended cleanly. `send` routes an
/// outbound envelope; bindings with many peers read the destination from the
/// envelope's metadata.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn recv(&self) -> Result<Option<Envelope>, TransportError>;

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}
