//! Purpose: Build reliability/availability/serviceability (RAS) event envelopes.
//! Exports: `RasEvent`, `Severity`, `EventType`, `ExtendedInfo`, `PoolSvcInfo`.
//! Role: Shared event shape forwarded to the control plane as a cluster event.
//! Invariants: Construction is all-or-nothing; a failed build holds no allocations.
//! Invariants: Timestamps use local time as `YYYY/MM/DD-HH:MM:SS.cc`.
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::debug;

use crate::core::alloc::try_string;
use crate::core::error::{Error, ErrorKind};

const TIMESTAMP_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]/[month]/[day]-[hour]:[minute]:[second].[subsecond digits:2]"
);
const RAS_STR_MAX_LEN: usize = 128;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(into = "u32")]
pub enum Severity {
    Unknown = 0,
    Fatal = 1,
    Warn = 2,
    Error = 3,
    Info = 4,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Unknown => "unknown",
            Severity::Fatal => "fatal",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Info => "info",
        }
    }
}

impl From<Severity> for u32 {
    fn from(severity: Severity) -> Self {
        severity as u32
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unknown" => Ok(Severity::Unknown),
            "fatal" => Ok(Severity::Fatal),
            "warn" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "info" => Ok(Severity::Info),
            _ => Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("unknown RAS severity: {value}"))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(into = "u32")]
pub enum EventType {
    Unknown = 0,
    StateChange = 1,
    InfoOnly = 2,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Unknown => "unknown",
            EventType::StateChange => "state_change",
            EventType::InfoOnly => "info_only",
        }
    }
}

impl From<EventType> for u32 {
    fn from(event_type: EventType) -> Self {
        event_type as u32
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unknown" => Ok(EventType::Unknown),
            "state_change" => Ok(EventType::StateChange),
            "info_only" => Ok(EventType::InfoOnly),
            _ => Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("unknown RAS event type: {value}"))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PoolSvcInfo {
    pub pool_uuid: String,
    pub svc_reps: Vec<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ExtendedInfo {
    #[serde(rename = "str_info")]
    Str(String),
    #[serde(rename = "pool_svc_info")]
    PoolSvc(PoolSvcInfo),
}

/// A fully built RAS event; `id` and `msg` are borrowed from the caller.
#[derive(Clone, Debug, Serialize)]
pub struct RasEvent<'a> {
    id: &'a str,
    severity: Severity,
    #[serde(rename = "type")]
    event_type: EventType,
    timestamp: String,
    hostname: String,
    msg: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rank: Option<u32>,
    proc_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    extended_info: Option<ExtendedInfo>,
}

impl<'a> RasEvent<'a> {
    pub fn build(
        id: &'a str,
        severity: Severity,
        event_type: EventType,
        msg: &'a str,
    ) -> Result<Self, Error> {
        Self::build_at(id, severity, event_type, msg, now_local())
    }

    pub(crate) fn build_at(
        id: &'a str,
        severity: Severity,
        event_type: EventType,
        msg: &'a str,
        now: OffsetDateTime,
    ) -> Result<Self, Error> {
        let timestamp = format_timestamp(now)?;
        // On failure `timestamp` drops here, leaving nothing allocated.
        let hostname = try_string(local_hostname())?;

        let event = Self {
            id,
            severity,
            event_type,
            timestamp,
            hostname,
            msg,
            rank: None,
            proc_id: std::process::id(),
            extended_info: None,
        };
        debug!(
            id = event.id,
            ts = %event.timestamp,
            host = %event.hostname,
            sev = %event.severity,
            kind = %event.event_type,
            msg = event.msg,
            "RAS event built"
        );
        Ok(event)
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }

    /// Sets the single extended-info variant, replacing any previous one.
    pub fn with_extended_info(mut self, info: ExtendedInfo) -> Self {
        self.extended_info = Some(info);
        self
    }

    pub fn id(&self) -> &str {
        self.id
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn msg(&self) -> &str {
        self.msg
    }

    pub fn rank(&self) -> Option<u32> {
        self.rank
    }

    pub fn proc_id(&self) -> u32 {
        self.proc_id
    }

    pub fn extended_info(&self) -> Option<&ExtendedInfo> {
        self.extended_info.as_ref()
    }
}

fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

pub(crate) fn format_timestamp(now: OffsetDateTime) -> Result<String, Error> {
    let mut buf = [0u8; RAS_STR_MAX_LEN];
    let mut cursor = &mut buf[..];
    now.format_into(&mut cursor, TIMESTAMP_FORMAT).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to format RAS timestamp")
            .with_source(err)
    })?;
    let written = RAS_STR_MAX_LEN - cursor.len();
    let text = std::str::from_utf8(&buf[..written]).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("RAS timestamp is not utf-8")
            .with_source(err)
    })?;
    try_string(text)
}

/// Node name of this host, resolved once per process.
pub(crate) fn local_hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| resolve_hostname().unwrap_or_else(|| "localhost".to_string()))
}

fn resolve_hostname() -> Option<String> {
    let mut buf = [0u8; RAS_STR_MAX_LEN];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len() - 1) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len() - 1);
    let name = String::from_utf8_lossy(&buf[..len]).into_owned();
    if name.is_empty() { None } else { Some(name) }
}
