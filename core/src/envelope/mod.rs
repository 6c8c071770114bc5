// Envelope module — types and wire codec for the exchange protocol

pub mod codec;
pub mod types;

pub use codec::{encode_envelope, format_envelope, parse_envelope, EnvelopeError};
pub use types::{Envelope, Payload, ReceiverSet};
