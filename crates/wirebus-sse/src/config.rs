//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the push transport's HTTP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path peers subscribe on with GET (default `"/sse"`).
    pub sse_route: String,
    /// Path peers publish to with POST (default `"/messages"`).
    pub messages_route: String,
    /// Envelopes that may wait in one session's delivery queue before `send` reports a backlog.
    pub session_queue_capacity: usize,
    /// Largest publish body accepted, in bytes.
    pub max_message_bytes: usize,
    /// Interval between keep-alive comments on idle subscribe streams.
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            sse_route: "/sse".into(),
            messages_route: "/messages".into(),
            session_queue_capacity: 64,
            max_message_bytes: 16 * 1024 * 1024, // 16 MB
            keep_alive_secs: 15,
        }
    }
}

impl ServerConfig {
    /// Check the routes are usable axum paths and the queue and keep-alive interval are non-zero.
    pub fn validate(&self) -> Result<(), String> {
        let routes = [
            ("sse_route", &self.sse_route),
            ("messages_route", &self.messages_route),
        ];
        for (name, route) in routes {
            if !route.starts_with('/') {
                return Err(format!("{name} must start with '/': {route:?}"));
            }
        }
        if self.session_queue_capacity == 0 {
            return Err("session_queue_capacity must be at least 1".into());
        }
        if self.keep_alive_secs == 0 {
            return Err("keep_alive_secs must be at least 1".into());
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
