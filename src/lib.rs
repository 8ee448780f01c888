//! depthcast: color + depth sensor streaming and synchronized recording
//!
//! Two time-correlated streams are compressed independently and either
//! multiplexed over one TCP connection or written to two local files that
//! share one time origin.

pub mod assets;
pub mod capture;
pub mod config;
pub mod decoder;
pub mod depth;
pub mod encoder;
pub mod error;
pub mod net;
pub mod pipeline;
pub mod protocol;
pub mod recording;

pub use error::{Error, Result};
