//! Error taxonomy for an encode session.

use thiserror::Error;

use crate::stream::StreamKind;

/// Coarse classification callers use to decide whether to keep feeding a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// `init_file` failed; the session is still uninitialized and owns nothing.
    Init,
    /// One `add_frame` call failed; the session is still open.
    Tick,
    /// The audio carry-over buffer would have exceeded its capacity.
    Overflow,
    /// The call is not valid in the session's current state.
    State,
}

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("container format not found: {name}")]
    FormatNotFound { name: String },

    #[error("cannot open output {path}: {source}")]
    OutputOpen {
        path: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("{kind} encoder not found: {codec}")]
    EncoderNotFound { kind: StreamKind, codec: String },

    #[error("cannot add {kind} stream: {source}")]
    StreamAdd {
        kind: StreamKind,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("cannot open {kind} codec: {source}")]
    CodecOpen {
        kind: StreamKind,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("cannot write container header: {0}")]
    Header(#[source] ffmpeg_next::Error),

    #[error("invalid settings: {reason}")]
    InvalidSettings { reason: String },

    #[error("pixel conversion failed: {0}")]
    Convert(#[source] ffmpeg_next::Error),

    #[error("{kind} encode failed: {source}")]
    Encode {
        kind: StreamKind,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("{kind} packet write failed: {source}")]
    Write {
        kind: StreamKind,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("invalid {kind} input: {reason}")]
    InvalidInput { kind: StreamKind, reason: String },

    #[error("audio carry-over overflow: {pending} + {incoming} bytes exceeds {capacity}")]
    BufferOverflow {
        pending: usize,
        incoming: usize,
        capacity: usize,
    },

    #[error("cannot write container trailer: {0}")]
    Trailer(#[source] ffmpeg_next::Error),

    #[error("operation {op} not allowed in state {state:?}")]
    InvalidState {
        op: &'static str,
        state: crate::session::SessionState,
    },
}

impl MuxError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MuxError::FormatNotFound { .. }
            | MuxError::OutputOpen { .. }
            | MuxError::EncoderNotFound { .. }
            | MuxError::StreamAdd { .. }
            | MuxError::CodecOpen { .. }
            | MuxError::Header(_)
            | MuxError::InvalidSettings { .. } => ErrorClass::Init,
            MuxError::BufferOverflow { .. } => ErrorClass::Overflow,
            MuxError::InvalidState { .. } => ErrorClass::State,
            MuxError::Convert(_)
            | MuxError::Encode { .. }
            | MuxError::Write { .. }
            | MuxError::InvalidInput { .. }
            | MuxError::Trailer(_) => ErrorClass::Tick,
        }
    }

    /// True when the caller may keep pushing frames into the same session.
    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Tick
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
