//! wmux-core: Shared protocol library for the wmux workspace runtime.
//!
//! Provides the Application Server identity type, the wire frame and its
//! protocol constants, length-prefixed CBOR framing, and the error types
//! shared by both sides of the communication subsystem.

pub mod codec;
pub mod error;
pub mod messages;
pub mod server_id;

// Re-export commonly used items at crate root.
pub use codec::{frame_decode, frame_encode, FrameDecoder};
pub use error::{CommsError, CommsResult};
pub use messages::{Arg, Frame, LAST_COMPATIBLE_MINOR, PROTOCOL_MAJOR, PROTOCOL_MINOR};
pub use server_id::ServerId;
