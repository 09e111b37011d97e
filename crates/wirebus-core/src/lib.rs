pub mod envelope;
pub mod errors;
pub mod ids;
pub mod transport;

pub use envelope::{Envelope, MessageId, RpcError, SESSION_ID_KEY};
pub use errors::TransportError;
pub use ids::SessionId;
pub use transport::Transport;
