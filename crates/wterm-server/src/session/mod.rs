//! Session bookkeeping for one connection.

pub mod table;

pub use table::{Session, SessionTable};
