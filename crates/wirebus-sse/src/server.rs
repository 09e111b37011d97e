use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::{stream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use url::form_urlencoded;
use wirebus_core::{Envelope, SessionId, TransportError, SESSION_ID_KEY};

use crate::config::ServerConfig;
use crate::registry::SessionRegistry;
use crate::transport::PushTransport;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the Axum router: subscribe (GET), publish (POST), and health.
pub fn build_router(transport: Arc<PushTransport>) -> Router {
    let config = transport.config();
    let router = if config.sse_route == config.messages_route {
        Router::new().route(
            &config.sse_route,
            get(subscribe_handler).post(publish_handler),
        )
    } else {
        Router::new()
            .route(&config.sse_route, get(subscribe_handler))
            .route(&config.messages_route, post(publish_handler))
    };

    router
        .route("/health", get(health_handler))
        .with_state(transport)
        .layer(TraceLayer::new_for_http())
}

/// Bind, serve, and return a handle. The transport is the dispatcher's bus.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    config
        .validate()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let transport = Arc::new(PushTransport::new(config));
    let listener = tokio::net::TcpListener::bind(transport.config().bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    let router = build_router(Arc::clone(&transport));
    let token = transport.shutdown_token();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "push transport server exited with error");
        }
    });

    tracing::info!(
        addr = %local_addr,
        sse_route = %transport.config().sse_route,
        messages_route = %transport.config().messages_route,
        "push transport listening"
    );

    Ok(ServerHandle {
        addr: local_addr,
        transport,
        server,
    })
}

/// Handle returned by `start()`: the bound address, the bus, and the server task.
pub struct ServerHandle {
    pub addr: SocketAddr,
    transport: Arc<PushTransport>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn transport(&self) -> Arc<PushTransport> {
        Arc::clone(&self.transport)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Shut the bus down and wait for open connections to drain.
    pub async fn shutdown(self) {
        self.transport.shutdown();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.server).await.is_err() {
            tracing::warn!("server did not stop within {SHUTDOWN_TIMEOUT:?}");
        }
    }
}

/// Unregisters its session when the subscribe stream is dropped, whatever the reason.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.unregister(&self.id) {
            tracing::info!(session_id = %self.id, "session closed");
        }
    }
}

struct Subscription {
    outbound: mpsc::Receiver<Envelope>,
    shutdown: CancellationToken,
    guard: SessionGuard,
}

fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

/// Publish address announced to a new subscriber: the messages route plus the
/// subscriber's own query parameters and its session id, sorted by key.
fn endpoint_url(messages_route: &str, mut params: Vec<(String, String)>, id: &SessionId) -> String {
    params.push((SESSION_ID_KEY.to_owned(), id.to_string()));
    params.sort_by(|a, b| a.0.cmp(&b.0));
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("{messages_route}?{query}")
}

fn valid_event_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['\n', '\r', '\0'])
}

fn message_event(envelope: &Envelope) -> Result<Event, TransportError> {
    let data = envelope.encode()?;
    let mut event = Event::default();
    if let Some(id) = envelope.id.as_ref().map(ToString::to_string) {
        if valid_event_id(&id) {
            event = event.id(id);
        }
    }
    Ok(event.event("message").data(data))
}

fn session_stream(
    endpoint: String,
    subscription: Subscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let announce = Event::default().id("1").event("endpoint").data(endpoint);

    let messages = stream::unfold(subscription, |mut sub| async move {
        let envelope = tokio::select! {
            _ = sub.shutdown.cancelled() => return None,
            next = sub.outbound.recv() => next?,
        };
        match message_event(&envelope) {
            Ok(event) => {
                tracing::trace!(
                    session_id = %sub.guard.id,
                    message_id = ?envelope.id,
                    "event emitted"
                );
                Some((Ok::<_, Infallible>(event), sub))
            }
            Err(e) => {
                tracing::error!(
                    session_id = %sub.guard.id,
                    error = %e,
                    "failed to encode outbound envelope, closing stream"
                );
                None
            }
        }
    });

    stream::once(async move { Ok::<_, Infallible>(announce) }).chain(messages)
}

/// GET: open an event stream, register a session, and announce where to publish.
async fn subscribe_handler(
    State(transport): State<Arc<PushTransport>>,
    RawQuery(query): RawQuery,
) -> Response {
    if transport.is_shut_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let registry = Arc::clone(transport.registry());
    let (id, outbound) = registry.register();
    tracing::info!(session_id = %id, active = registry.count(), "session opened");

    let endpoint = endpoint_url(
        &transport.config().messages_route,
        query_pairs(query.as_deref()),
        &id,
    );
    let subscription = Subscription {
        outbound,
        shutdown: transport.shutdown_token(),
        guard: SessionGuard { registry, id },
    };

    let keep_alive =
        KeepAlive::new().interval(Duration::from_secs(transport.config().keep_alive_secs));
    let sse = Sse::new(session_stream(endpoint, subscription)).keep_alive(keep_alive);

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        sse,
    )
        .into_response()
}

/// POST: decode one envelope, tag it with the query parameters, and hand it to `recv`.
async fn publish_handler(
    State(transport): State<Arc<PushTransport>>,
    RawQuery(query): RawQuery,
    body: Body,
) -> Response {
    // Later occurrences of a repeated key overwrite earlier ones.
    let metadata: HashMap<String, String> = query_pairs(query.as_deref()).into_iter().collect();

    let session_id = match metadata.get(SESSION_ID_KEY) {
        Some(id) if !id.is_empty() => id.clone(),
        _ => return (StatusCode::BAD_REQUEST, "session_id is required").into_response(),
    };

    let bytes = match axum::body::to_bytes(body, transport.config().max_message_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "failed to read publish body");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let mut envelope = match Envelope::decode(&bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "rejected malformed envelope");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    envelope.metadata = Some(metadata);

    tracing::debug!(
        session_id = %session_id,
        message_id = ?envelope.id,
        method = envelope.method.as_deref().unwrap_or(""),
        "publish received"
    );

    match transport.offer(envelope).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn health_handler(State(transport): State<Arc<PushTransport>>) -> impl IntoResponse {
    let (status, label) = if transport.is_shut_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "healthy")
    };
    (
        status,
        axum::Json(serde_json::json!({
            "status": label,
            "sessions": transport.session_count(),
        })),
    )
}
