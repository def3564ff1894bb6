//! Channel connection layer — owns the single authenticated session to the
//! outbound messaging channel, recovers from disconnects, and exposes the
//! one send primitive everything else goes through.

pub mod connection;
pub mod session;
pub mod transport;

pub use connection::{ChannelConnection, ChannelEvent};
pub use session::{CredentialStore, SessionCredentials, SessionState};
pub use transport::{ChannelTransport, DisconnectCause, HandshakeStart, LogTransport, TransportEvent};
