//! Transport layer: the frame reader/writer pair and the WebSocket adapter
//! it runs on.

pub mod framer;
pub mod websocket;

pub use framer::{FrameSender, Inbound};
