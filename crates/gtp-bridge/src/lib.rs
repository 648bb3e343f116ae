//! GTP engine bridge: subprocess lifecycle, response framing and pooling.
//!
//! This crate knows nothing about any game server. It spawns engines that
//! speak the Go Text Protocol over stdio, frames their replies, exposes a
//! promise-style command channel per engine, and manages a bounded pool of
//! instances per role.

mod adapter;
mod capabilities;
mod error;
mod framing;
mod pool;
mod vertex;

pub use adapter::{Engine, EngineOptions, EngineState, StderrEvent};
pub use capabilities::EngineCaps;
pub use error::GtpError;
pub use framing::{Frame, FrameBuffer};
pub use pool::{EnginePool, Role};
pub use vertex::{decode_move, encode_move, gtp_column, Move};
