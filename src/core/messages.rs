//! Purpose: Typed request/response bodies for each bridge operation and their codec.
//! Exports: request structs, `StatusResp`, `GetPoolSvcResp`, `pack`, `unpack`.
//! Role: Marshaling layer between operations and the call executor.
//! Invariants: `pack` sizes the body first, then fills one fallibly reserved buffer.
//! Invariants: Borrowed request fields are never copied or freed here.
use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::alloc::try_buffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::ras::RasEvent;

#[derive(Debug, Serialize)]
pub struct NotifyReadyReq<'a> {
    pub uri: &'a str,
    pub num_contexts: u32,
    pub listener_socket: &'a str,
    pub instance_index: u32,
    pub num_targets: u32,
}

#[derive(Debug, Default, Serialize)]
pub struct BioErrorReq<'a> {
    pub uri: &'a str,
    pub unmap_error: bool,
    pub write_error: bool,
    pub read_error: bool,
    pub target_id: u32,
    pub instance_index: u32,
    pub listener_socket: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterEvent<'e, 'a> {
    Ras(&'e RasEvent<'a>),
}

#[derive(Debug, Serialize)]
pub struct ClusterEventReq<'e, 'a> {
    pub sequence: u64,
    pub event: ClusterEvent<'e, 'a>,
}

#[derive(Debug, Serialize)]
pub struct GetPoolSvcReq<'a> {
    pub pool_uuid: &'a str,
}

/// Business status carried by status-only replies; an empty body means success.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct StatusResp {
    #[serde(default)]
    pub status: i32,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct GetPoolSvcResp {
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub svc_reps: Vec<u32>,
}

pub fn pack<T: Serialize>(request: &T) -> Result<Vec<u8>, Error> {
    let mut counter = CountingWriter::default();
    serde_json::to_writer(&mut counter, request).map_err(marshal_error)?;

    let mut buf = try_buffer(counter.len)?;
    serde_json::to_writer(&mut buf, request).map_err(marshal_error)?;
    Ok(buf)
}

pub fn unpack<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("failed to unpack dRPC response body")
            .with_source(err)
    })
}

/// Business status of a status-only reply.
pub fn unpack_status(body: &[u8]) -> Result<i32, Error> {
    if body.is_empty() {
        return Ok(0);
    }
    unpack::<StatusResp>(body).map(|resp| resp.status)
}

fn marshal_error(err: serde_json::Error) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message("failed to pack dRPC request")
        .with_source(err)
}

#[derive(Default)]
struct CountingWriter {
    len: usize,
}

impl io::Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.len += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pack_fills_exactly_sized_buffer() {
        let req = GetPoolSvcReq {
            pool_uuid: "6f7b1c4e-0d4a-4b8e-9e52-3c1d2a5b6c7d",
        };
        let buf = pack(&req).expect("pack");
        assert_eq!(buf.len(), serde_json::to_vec(&req).expect("json").len());
        let value: serde_json::Value = serde_json::from_slice(&buf).expect("json");
        assert_eq!(
            value,
            json!({"pool_uuid": "6f7b1c4e-0d4a-4b8e-9e52-3c1d2a5b6c7d"})
        );
    }

    #[test]
    fn bio_error_defaults_clear_every_flag() {
        let req = BioErrorReq {
            uri: "tcp://10.0.0.1:31416",
            target_id: 3,
            ..Default::default()
        };
        let value: serde_json::Value =
            serde_json::from_slice(&pack(&req).expect("pack")).expect("json");
        assert_eq!(value["unmap_error"], false);
        assert_eq!(value["write_error"], false);
        assert_eq!(value["read_error"], false);
        assert_eq!(value["target_id"], 3);
    }

    #[test]
    fn status_only_body_may_be_empty() {
        assert_eq!(unpack_status(b"").expect("empty"), 0);
        assert_eq!(unpack_status(br#"{"status":-1003}"#).expect("status"), -1003);
        assert_eq!(unpack_status(b"{}").expect("default"), 0);
        let err = unpack_status(b"\x00\x01").expect_err("garbage");
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn pool_svc_response_defaults_missing_fields() {
        let resp: GetPoolSvcResp = unpack(br#"{"svc_reps":[3,7,9]}"#).expect("resp");
        assert_eq!(resp.status, 0);
        assert_eq!(resp.svc_reps, vec![3, 7, 9]);
    }
}
