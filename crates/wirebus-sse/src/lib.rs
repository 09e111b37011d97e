//! Multiplexed push transport: many subscribe (server-sent events) and
//! publish (HTTP POST) connections exposed as one `recv`/`send` bus.

pub mod config;
pub mod registry;
pub mod server;
pub mod transport;

pub use config::ServerConfig;
pub use registry::SessionRegistry;
pub use server::{build_router, start, ServerHandle};
pub use transport::PushTransport;
