//! Typed messages carried inside wterm frames.
//!
//! Opcode values and payload shapes must match the web client's `MsgType`,
//! `SessionType` and `FSOP` constants.

use crate::codec::Frame;
use crate::error::{WtermError, WtermResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session id for connection-scoped frames: auth questions and `INFO`.
pub const CONTROL_SESSION_ID: u16 = 0;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Auth = 0,
    NewSession = 1,
    CloseSession = 2,
    TermData = 3,
    FsOperation = 4,
    Info = 5,
    Resize = 0x0100,
}

impl From<Opcode> for u16 {
    fn from(op: Opcode) -> u16 {
        op as u16
    }
}

impl TryFrom<u16> for Opcode {
    type Error = WtermError;
    fn try_from(v: u16) -> Result<Self, WtermError> {
        match v {
            0 => Ok(Self::Auth),
            1 => Ok(Self::NewSession),
            2 => Ok(Self::CloseSession),
            3 => Ok(Self::TermData),
            4 => Ok(Self::FsOperation),
            5 => Ok(Self::Info),
            0x0100 => Ok(Self::Resize),
            other => Err(WtermError::InvalidMessage(format!(
                "unknown opcode {other:#06x}"
            ))),
        }
    }
}

/// Kind of session requested by `NEW_SESSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SessionKind {
    Shell = 0,
    Filesystem = 1,
}

impl TryFrom<u16> for SessionKind {
    type Error = WtermError;
    fn try_from(v: u16) -> Result<Self, WtermError> {
        match v {
            0 => Ok(Self::Shell),
            1 => Ok(Self::Filesystem),
            other => Err(WtermError::InvalidMessage(format!(
                "unknown session kind {other}"
            ))),
        }
    }
}

/// Filesystem operation codes (first payload byte of `FS_OPERATION`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FsOp {
    Getwd = 0,
    ReadDir = 1,
    Mkdir = 2,
    Remove = 3,
    Rename = 4,
    DownloadFile = 5,
    UploadFile = 6,
}

impl FsOp {
    /// Label used as the prefix of error text, e.g. `[FS READDIR]`.
    pub fn label(self) -> &'static str {
        match self {
            FsOp::Getwd => "GETWD",
            FsOp::ReadDir => "READDIR",
            FsOp::Mkdir => "MKDIR",
            FsOp::Remove => "REMOVE",
            FsOp::Rename => "RENAME",
            FsOp::DownloadFile => "DOWNLOAD",
            FsOp::UploadFile => "UPLOAD",
        }
    }
}

impl From<FsOp> for u8 {
    fn from(op: FsOp) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for FsOp {
    type Error = WtermError;
    fn try_from(v: u8) -> Result<Self, WtermError> {
        match v {
            0 => Ok(Self::Getwd),
            1 => Ok(Self::ReadDir),
            2 => Ok(Self::Mkdir),
            3 => Ok(Self::Remove),
            4 => Ok(Self::Rename),
            5 => Ok(Self::DownloadFile),
            6 => Ok(Self::UploadFile),
            other => Err(WtermError::InvalidMessage(format!("unknown fs op {other}"))),
        }
    }
}

/// Client answer to an auth question. `password` carries the answer for
/// every question, not only passwords.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDesc {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub saved: bool,
}

/// Terminal size carried by `RESIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeDesc {
    pub rows: u16,
    pub cols: u16,
}

/// Out-of-band notification carried by `INFO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoDesc {
    #[serde(rename = "type")]
    pub kind: String,
    pub info: String,
}

impl InfoDesc {
    pub fn error(info: impl Into<String>) -> Self {
        Self {
            kind: "ERROR".to_string(),
            info: info.into(),
        }
    }
}

/// A filesystem request: raw op byte plus string arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsRequest {
    pub op: u8,
    #[serde(default)]
    pub args: Vec<String>,
}

impl FsRequest {
    pub fn new(op: FsOp, args: Vec<String>) -> Self {
        Self { op: op.into(), args }
    }
}

/// One `READDIR` result entry as the web client expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub dir: bool,
    #[serde(rename = "modTime")]
    pub mod_time: i64,
    pub perm: u32,
}

/// Messages sent by the browser client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Auth(AuthDesc),
    /// Raw session kind; unknown kinds are answered, not rejected at decode.
    NewSession { kind: u16 },
    CloseSession,
    TermData(Vec<u8>),
    FsOperation(FsRequest),
    Resize(SizeDesc),
}

impl ClientMessage {
    /// Decode a frame's payload. Unknown opcodes yield `Ok(None)`.
    pub fn decode(frame: &Frame) -> WtermResult<Option<Self>> {
        let Ok(opcode) = Opcode::try_from(frame.opcode) else {
            return Ok(None);
        };
        let payload = frame.payload.as_slice();
        let msg = match opcode {
            Opcode::Auth => ClientMessage::Auth(serde_json::from_slice(payload)?),
            Opcode::NewSession => {
                if payload.len() < 2 {
                    return Err(WtermError::InvalidMessage(
                        "NEW_SESSION payload shorter than 2 bytes".into(),
                    ));
                }
                ClientMessage::NewSession {
                    kind: u16::from_le_bytes([payload[0], payload[1]]),
                }
            }
            Opcode::CloseSession => ClientMessage::CloseSession,
            Opcode::TermData => ClientMessage::TermData(payload.to_vec()),
            Opcode::FsOperation => ClientMessage::FsOperation(decode_fs_request(payload)?),
            Opcode::Resize => ClientMessage::Resize(serde_json::from_slice(payload)?),
            Opcode::Info => return Ok(None),
        };
        Ok(Some(msg))
    }

    pub fn encode(&self, session_id: u16) -> WtermResult<Frame> {
        let (opcode, payload) = match self {
            ClientMessage::Auth(desc) => (Opcode::Auth, serde_json::to_vec(desc)?),
            ClientMessage::NewSession { kind } => (Opcode::NewSession, kind.to_le_bytes().to_vec()),
            ClientMessage::CloseSession => (Opcode::CloseSession, Vec::new()),
            ClientMessage::TermData(data) => (Opcode::TermData, data.clone()),
            ClientMessage::FsOperation(req) => {
                let mut buf = vec![req.op];
                buf.extend(serde_json::to_vec(&req.args)?);
                (Opcode::FsOperation, buf)
            }
            ClientMessage::Resize(size) => (Opcode::Resize, serde_json::to_vec(size)?),
        };
        Ok(Frame::new(opcode.into(), session_id, payload))
    }
}

/// `FS_OPERATION` requests are `[op byte][JSON args array]`; the web client
/// sends `{"op": n, "args": [...]}` instead, which is accepted too.
fn decode_fs_request(payload: &[u8]) -> WtermResult<FsRequest> {
    let first = payload.iter().position(|b| !b.is_ascii_whitespace());
    if let Some(i) = first {
        if payload[i] == b'{' {
            return Ok(serde_json::from_slice(payload)?);
        }
    }
    let (&op, rest) = payload
        .split_first()
        .ok_or_else(|| WtermError::InvalidMessage("empty FS_OPERATION payload".into()))?;
    let args = if rest.is_empty() {
        Vec::new()
    } else {
        serde_json::from_slice(rest)?
    };
    Ok(FsRequest { op, args })
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// A backend auth question, sent as plain text.
    AuthQuestion(String),
    NewSession { success: bool, windows_path: bool },
    TermData(Vec<u8>),
    FsResult { op: FsOp, value: Value },
    Info(InfoDesc),
}

impl ServerMessage {
    pub fn encode(&self, session_id: u16) -> WtermResult<Frame> {
        let (opcode, payload) = match self {
            ServerMessage::AuthQuestion(q) => (Opcode::Auth, q.as_bytes().to_vec()),
            ServerMessage::NewSession {
                success,
                windows_path,
            } => (
                Opcode::NewSession,
                vec![u8::from(*success), u8::from(*windows_path)],
            ),
            ServerMessage::TermData(data) => (Opcode::TermData, data.clone()),
            ServerMessage::FsResult { op, value } => {
                let mut buf = vec![u8::from(*op)];
                buf.extend(serde_json::to_vec(value)?);
                (Opcode::FsOperation, buf)
            }
            ServerMessage::Info(desc) => (Opcode::Info, serde_json::to_vec(desc)?),
        };
        Ok(Frame::new(opcode.into(), session_id, payload))
    }

    /// Decode a server frame (used by native clients and tests).
    pub fn decode(frame: &Frame) -> WtermResult<Self> {
        let payload = frame.payload.as_slice();
        match Opcode::try_from(frame.opcode)? {
            Opcode::Auth => Ok(ServerMessage::AuthQuestion(
                String::from_utf8_lossy(payload).into_owned(),
            )),
            Opcode::NewSession => {
                if payload.len() < 2 {
                    return Err(WtermError::InvalidMessage(
                        "NEW_SESSION reply shorter than 2 bytes".into(),
                    ));
                }
                Ok(ServerMessage::NewSession {
                    success: payload[0] != 0,
                    windows_path: payload[1] != 0,
                })
            }
            Opcode::TermData => Ok(ServerMessage::TermData(payload.to_vec())),
            Opcode::FsOperation => {
                let (&op, rest) = payload.split_first().ok_or_else(|| {
                    WtermError::InvalidMessage("empty FS_OPERATION reply".into())
                })?;
                Ok(ServerMessage::FsResult {
                    op: FsOp::try_from(op)?,
                    value: serde_json::from_slice(rest)?,
                })
            }
            Opcode::Info => Ok(ServerMessage::Info(serde_json::from_slice(payload)?)),
            other => Err(WtermError::InvalidMessage(format!(
                "{other:?} is not a server message"
            ))),
        }
    }
}
