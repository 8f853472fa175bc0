//! Error types for the segue playback engine

use crate::audio::packetizer::PacketizerError;
use thiserror::Error;

/// Playback engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration or shared-library error
    #[error(transparent)]
    Common(#[from] segue_common::Error),

    /// No decoder accepts the uri, or the decoder failed to open it
    #[error("Open error: {0}")]
    Open(String),

    /// Decoder failed mid-stream
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Output sink rejected a buffer or could not be created
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Packet framing error
    #[error("Packetizer error: {0}")]
    Packetizer(#[from] PacketizerError),

    /// Buffer capacity or format misuse
    #[error("Buffer error: {0}")]
    Buffer(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors (thread spawn, unexpected conditions)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
