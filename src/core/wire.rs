// dRPC call/response envelopes, the module/method registry, and stream framing.
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

pub const FRAME_MAGIC: [u8; 4] = *b"DRPC";
pub const FRAME_VERSION: u16 = 1;
pub const FRAME_HEADER_LEN: usize = 12;
pub const MAX_FRAME_BODY: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub i32);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(pub i32);

pub mod registry {
    use super::{MethodId, ModuleId};

    pub const MODULE_MGMT: ModuleId = ModuleId(2);
    pub const MODULE_SRV: ModuleId = ModuleId(3);

    pub const METHOD_MGMT_CLUSTER_EVENT: MethodId = MethodId(240);

    pub const METHOD_SRV_NOTIFY_READY: MethodId = MethodId(301);
    pub const METHOD_SRV_BIO_ERR: MethodId = MethodId(302);
    pub const METHOD_SRV_GET_POOL_SVC: MethodId = MethodId(303);
}

/// Transport-level outcome reported by the daemon for one call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Status {
    Success = 0,
    Submitted = 1,
    Failure = 2,
    UnknownModule = 3,
    UnknownMethod = 4,
    FailedUnmarshalCall = 5,
    FailedUnmarshalPayload = 6,
    FailedMarshal = 7,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status as i32
    }
}

impl TryFrom<i32> for Status {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Success),
            1 => Ok(Status::Submitted),
            2 => Ok(Status::Failure),
            3 => Ok(Status::UnknownModule),
            4 => Ok(Status::UnknownMethod),
            5 => Ok(Status::FailedUnmarshalCall),
            6 => Ok(Status::FailedUnmarshalPayload),
            7 => Ok(Status::FailedMarshal),
            _ => Err(Error::new(ErrorKind::Decode)
                .with_message("unknown dRPC status")
                .with_status(value)),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub module: ModuleId,
    pub method: MethodId,
    pub sequence: i64,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub sequence: i64,
    pub status: Status,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(sequence: i64, status: Status, body: Vec<u8>) -> Self {
        Self {
            sequence,
            status,
            body,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub version: u16,
    pub body_len: u32,
}

impl FrameHeader {
    pub fn new(body_len: u32) -> Self {
        Self {
            version: FRAME_VERSION,
            body_len,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0..4].copy_from_slice(&FRAME_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        write_u32(&mut buf, 8, self.body_len);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(Error::new(ErrorKind::Decode).with_message("frame header too small"));
        }
        if buf[0..4] != FRAME_MAGIC {
            return Err(Error::new(ErrorKind::Decode).with_message("bad frame magic"));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != FRAME_VERSION {
            return Err(Error::new(ErrorKind::Decode).with_message("unsupported frame version"));
        }
        let body_len = read_u32(buf, 8);
        if body_len as usize > MAX_FRAME_BODY {
            return Err(Error::new(ErrorKind::Decode).with_message("frame body exceeds max"));
        }
        Ok(Self { version, body_len })
    }
}

/// Header plus JSON body for one envelope.
pub fn encode_frame<T: Serialize>(envelope: &T) -> Result<Vec<u8>, Error> {
    let body = serde_json::to_vec(envelope).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode dRPC envelope")
            .with_source(err)
    })?;
    if body.len() > MAX_FRAME_BODY {
        return Err(Error::new(ErrorKind::InvalidArgument).with_message("dRPC envelope too large"));
    }
    let header = FrameHeader::new(body.len() as u32);
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("failed to decode dRPC envelope")
            .with_source(err)
    })
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(out)
}
