//! Method dispatch and the initialization handshake.

pub mod handler;
pub mod negotiation;
pub mod validator;

pub use handler::ProtocolHandler;
pub use negotiation::{Handshake, Phase};
