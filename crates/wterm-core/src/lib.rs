//! wterm-core: Shared protocol library for wterm.
//!
//! Provides the fixed binary frame codec, the typed client/server messages
//! carried inside frames, and Windows volume path splitting.

pub mod codec;
pub mod error;
pub mod messages;
pub mod volume;

// Re-export commonly used items at crate root.
pub use codec::{Frame, HEADER_LEN};
pub use error::{WtermError, WtermResult};
pub use messages::{
    AuthDesc, ClientMessage, DirEntryInfo, FsOp, FsRequest, InfoDesc, Opcode, ServerMessage,
    SessionKind, SizeDesc, CONTROL_SESSION_ID,
};
pub use volume::split_volume;
