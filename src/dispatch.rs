//! Minimal dispatcher used by the binary: answers `ping` and `echo`,
//! rejects everything else with METHOD_NOT_FOUND.

use std::sync::Arc;

use serde_json::json;
use wirebus_core::{Envelope, RpcError, Transport};

/// Build the reply for one inbound envelope. Notifications and responses get none.
pub fn handle(envelope: &Envelope) -> Option<Envelope> {
    if !envelope.is_request() {
        return None;
    }
    let method = envelope.method.as_deref().unwrap_or_default();
    let outcome = match method {
        "ping" => Ok(json!({})),
        "echo" => Ok(envelope.params.clone().unwrap_or(serde_json::Value::Null)),
        other => Err(RpcError::method_not_found(other)),
    };
    Some(envelope.reply(outcome))
}

/// Drive `transport` until it reports end of stream.
pub async fn run(transport: Arc<dyn Transport>) -> anyhow::Result<()> {
    loop {
        let envelope = match transport.recv().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                tracing::info!("transport closed, dispatcher stopping");
                return Ok(());
            }
            Err(e) if e.is_malformed_input() => {
                tracing::warn!(error = %e, "malformed inbound envelope");
                let reply = Envelope::error_response(None, RpcError::parse_error());
                if let Err(e) = transport.send(reply).await {
                    tracing::debug!(error = %e, "could not report parse error");
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            message_id = ?envelope.id,
            method = envelope.method.as_deref().unwrap_or(""),
            session_id = envelope.session_id().unwrap_or(""),
            "dispatching"
        );

        if let Some(reply) = handle(&envelope) {
            if let Err(e) = transport.send(reply).await {
                tracing::warn!(error = %e, kind = e.error_kind(), "reply not delivered");
            }
        }
    }
}
