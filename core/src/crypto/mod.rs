// Cryptography module — side-channel file encryption and scratch staging

pub mod file;
pub mod scratch;

pub use file::{FileCodec, FileCodecError, DEFAULT_KDF_ROUNDS};
pub use scratch::{delete_file, ScratchDir};
