//! TCP transport
//!
//! One connection carries both streams. The capture device connects as the
//! client; the consumer listens.

pub mod listener;
pub mod sender;

pub use listener::serve;
pub use sender::TransportSender;
