//! Bridge error types

use thiserror::Error;

/// Errors surfaced through an engine's completion slots.
///
/// Cloneable so that a single process death can resolve every pending slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GtpError {
    #[error("engine is dead")]
    DeadEngine,

    /// The engine answered with a `?` failure frame. Payload is the
    /// engine-supplied reason.
    #[error("engine error: {0}")]
    ProtocolFailure(String),

    /// The reply did not start with `=` or `?`.
    #[error("unexpected engine output: {0}")]
    UnexpectedOutput(String),

    /// Writing to the engine's stdin failed.
    #[error("engine transport error: {0}")]
    Transport(String),

    /// The process exited while a request was pending.
    #[error("engine exited")]
    EngineExited,

    #[error("failed to spawn engine: {0}")]
    Spawn(String),
}
