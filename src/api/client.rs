//! Purpose: Own the engine's dRPC session and expose the bridge operations.
//! Exports: `DrpcClient`, `Addressing`, `Listener`, `MediaErrorKind`, static collaborators.
//! Role: Explicit session object replacing process-wide connection state.
//! Invariants: All operations serialize on the session mutex; one call completes before the next.
//! Invariants: Absent connection yields `Uninitialized` before any collaborator is consulted.
//! Invariants: A failed readiness handshake closes the channel and leaves the session absent.
#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::config::{DrpcConfig, EngineInfo};
use crate::core::alloc::try_string;
use crate::core::error::{Error, ErrorKind};
use crate::core::executor::execute;
use crate::core::messages::{
    BioErrorReq, ClusterEvent, ClusterEventReq, GetPoolSvcReq, GetPoolSvcResp, NotifyReadyReq,
    pack, unpack, unpack_status,
};
use crate::core::ranks::{PoolId, RankList};
use crate::core::ras::{EventType, ExtendedInfo, PoolSvcInfo, RasEvent, Severity};
use crate::core::transport::Transport;
use crate::core::wire::{Response, registry};

pub type ApiResult<T> = Result<T, Error>;

pub const POOL_SVC_RANKS_UPDATE: &str = "pool_svc_ranks_update";
const POOL_SVC_RANKS_UPDATE_MSG: &str = "List of pool service replica ranks has been updated.";
const SELF_URI_TAG: u32 = 0;

/// Produces this engine instance's network-addressable URI.
pub trait Addressing: Send + Sync {
    fn self_uri(&self, tag: u32) -> ApiResult<String>;
}

/// Owner of the engine's own dRPC listener socket; the path is only ever borrowed.
pub trait Listener: Send + Sync {
    fn socket_path(&self) -> &Path;
}

#[derive(Clone, Debug)]
pub struct StaticAddressing {
    uri: String,
}

impl StaticAddressing {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

impl Addressing for StaticAddressing {
    fn self_uri(&self, _tag: u32) -> ApiResult<String> {
        try_string(&self.uri)
    }
}

#[derive(Clone, Debug)]
pub struct StaticListener {
    path: PathBuf,
}

impl StaticListener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Listener for StaticListener {
    fn socket_path(&self) -> &Path {
        &self.path
    }
}

/// Media error classes reported by the block I/O layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MediaErrorKind {
    Write = 0,
    Read = 1,
    Unmap = 2,
    /// Reserved; carries no flag on the wire yet.
    Checksum = 3,
}

impl MediaErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaErrorKind::Write => "write",
            MediaErrorKind::Read => "read",
            MediaErrorKind::Unmap => "unmap",
            MediaErrorKind::Checksum => "checksum",
        }
    }

    fn apply(self, req: &mut BioErrorReq<'_>) {
        match self {
            MediaErrorKind::Unmap => req.unmap_error = true,
            MediaErrorKind::Write => req.write_error = true,
            MediaErrorKind::Read => req.read_error = true,
            MediaErrorKind::Checksum => {}
        }
    }
}

impl TryFrom<i32> for MediaErrorKind {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MediaErrorKind::Write),
            1 => Ok(MediaErrorKind::Read),
            2 => Ok(MediaErrorKind::Unmap),
            3 => Ok(MediaErrorKind::Checksum),
            _ => Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("unknown media error kind: {value}"))),
        }
    }
}

impl FromStr for MediaErrorKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "write" => Ok(MediaErrorKind::Write),
            "read" => Ok(MediaErrorKind::Read),
            "unmap" => Ok(MediaErrorKind::Unmap),
            "checksum" => Ok(MediaErrorKind::Checksum),
            _ => Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("unknown media error kind: {value}"))),
        }
    }
}

pub struct DrpcClient<T: Transport> {
    transport: T,
    config: DrpcConfig,
    engine: EngineInfo,
    addressing: Arc<dyn Addressing>,
    listener: Arc<dyn Listener>,
    conn: Mutex<Option<T::Handle>>,
    event_seq: AtomicU64,
}

impl<T: Transport> DrpcClient<T> {
    pub fn new(
        transport: T,
        config: DrpcConfig,
        engine: EngineInfo,
        addressing: Arc<dyn Addressing>,
        listener: Arc<dyn Listener>,
    ) -> Self {
        Self {
            transport,
            config,
            engine,
            addressing,
            listener,
            conn: Mutex::new(None),
            event_seq: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &DrpcConfig {
        &self.config
    }

    pub fn engine(&self) -> EngineInfo {
        self.engine
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Opens the daemon channel and performs the readiness handshake.
    ///
    /// On open failure the session stays absent. On handshake failure the channel is
    /// closed again and the handshake error is returned.
    ///
    /// # Panics
    ///
    /// Panics if the session is already connected.
    pub fn connect(&self) -> ApiResult<()> {
        let path = self.config.socket_path();
        let mut conn = self.lock();
        assert!(conn.is_none(), "dRPC session is already connected");

        let handle = self.transport.connect(&path)?;
        *conn = Some(handle);
        info!(path = %path.display(), "connected to dRPC server");

        if let Err(err) = self.notify_ready_locked(&mut conn) {
            error!(error = %err, "dRPC readiness handshake failed");
            if let Some(handle) = conn.take() {
                if let Err(close_err) = self.transport.close(handle) {
                    warn!(error = %close_err, "failed to close dRPC channel after handshake");
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Closes the channel; the session is absent afterwards even if closing failed.
    ///
    /// # Panics
    ///
    /// Panics if the session is not connected.
    pub fn close(&self) -> ApiResult<()> {
        let mut conn = self.lock();
        let Some(handle) = conn.take() else {
            panic!("dRPC session closed without a connection");
        };
        self.transport.close(handle).inspect_err(|err| {
            error!(error = %err, "failed to close dRPC channel");
        })
    }

    pub fn notify_ready(&self) -> ApiResult<()> {
        let mut conn = self.lock();
        self.notify_ready_locked(&mut conn)
    }

    pub fn notify_bio_error(&self, kind: MediaErrorKind, target_id: u32) -> ApiResult<()> {
        let mut conn = self.lock();
        require_connected(&*conn)?;

        let uri = self.addressing.self_uri(SELF_URI_TAG)?;
        let mut req = BioErrorReq {
            uri: &uri,
            target_id,
            instance_index: self.engine.instance_idx,
            listener_socket: listener_path(self.listener.as_ref())?,
            ..Default::default()
        };
        kind.apply(&mut req);
        let body = pack(&req)?;

        execute(
            &self.transport,
            conn.as_mut(),
            registry::MODULE_SRV,
            registry::METHOD_SRV_BIO_ERR,
            body,
            check_status,
        )
    }

    /// Same as [`Self::notify_bio_error`] for a raw media error code.
    pub fn notify_bio_error_code(&self, code: i32, target_id: u32) -> ApiResult<()> {
        let kind = MediaErrorKind::try_from(code)?;
        self.notify_bio_error(kind, target_id)
    }

    pub fn notify_ras_event(&self, event: &RasEvent<'_>) -> ApiResult<()> {
        let mut conn = self.lock();
        self.notify_ras_event_locked(&mut conn, event)
    }

    /// Publishes the updated service replica ranks of `pool` as a RAS event.
    ///
    /// # Panics
    ///
    /// Panics if `ranks` is empty.
    pub fn notify_pool_svc_update(&self, pool: &PoolId, ranks: &RankList) -> ApiResult<()> {
        let mut conn = self.lock();
        require_connected(&*conn)?;
        assert!(!ranks.is_empty(), "pool service rank list must not be empty");

        let info = PoolSvcInfo {
            pool_uuid: pool.to_canonical()?,
            svc_reps: ranks.to_wire()?,
        };
        let event = RasEvent::build(
            POOL_SVC_RANKS_UPDATE,
            Severity::Info,
            EventType::StateChange,
            POOL_SVC_RANKS_UPDATE_MSG,
        )?
        .with_extended_info(ExtendedInfo::PoolSvc(info));

        self.notify_ras_event_locked(&mut conn, &event)
    }

    /// Fetches the service replica ranks of `pool`.
    ///
    /// A non-zero status reported by the daemon is returned verbatim as an
    /// `ErrorKind::Remote` error.
    pub fn get_pool_svc_ranks(&self, pool: &PoolId) -> ApiResult<RankList> {
        let mut conn = self.lock();
        require_connected(&*conn)?;

        let pool_uuid = pool.to_canonical()?;
        debug!(pool = %pool_uuid, "fetching svc_ranks");
        let body = pack(&GetPoolSvcReq {
            pool_uuid: &pool_uuid,
        })?;

        execute(
            &self.transport,
            conn.as_mut(),
            registry::MODULE_SRV,
            registry::METHOD_SRV_GET_POOL_SVC,
            body,
            |response| {
                let resp: GetPoolSvcResp = unpack(&response.body)?;
                if resp.status != 0 {
                    error!(pool = %pool_uuid, status = resp.status, "failure fetching svc_ranks");
                    return Err(Error::remote(resp.status)
                        .with_message(format!("failed to fetch svc_ranks for pool {pool_uuid}")));
                }
                let ranks = RankList::from_wire(&resp.svc_reps)?;
                debug!(pool = %pool_uuid, count = ranks.len(), "fetched svc_ranks");
                Ok(ranks)
            },
        )
    }

    fn notify_ready_locked(&self, conn: &mut Option<T::Handle>) -> ApiResult<()> {
        require_connected(conn)?;

        let uri = self.addressing.self_uri(SELF_URI_TAG)?;
        let req = NotifyReadyReq {
            uri: &uri,
            num_contexts: self.engine.num_contexts(),
            listener_socket: listener_path(self.listener.as_ref())?,
            instance_index: self.engine.instance_idx,
            num_targets: self.engine.num_targets,
        };
        let body = pack(&req)?;

        execute(
            &self.transport,
            conn.as_mut(),
            registry::MODULE_SRV,
            registry::METHOD_SRV_NOTIFY_READY,
            body,
            check_status,
        )
    }

    fn notify_ras_event_locked(
        &self,
        conn: &mut Option<T::Handle>,
        event: &RasEvent<'_>,
    ) -> ApiResult<()> {
        if event.id().is_empty() {
            error!("invalid RAS event");
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("RAS event has no id"));
        }
        require_connected(conn)?;

        let req = ClusterEventReq {
            sequence: self.event_seq.fetch_add(1, Ordering::Relaxed) + 1,
            event: ClusterEvent::Ras(event),
        };
        let body = pack(&req)?;

        execute(
            &self.transport,
            conn.as_mut(),
            registry::MODULE_MGMT,
            registry::METHOD_MGMT_CLUSTER_EVENT,
            body,
            check_status,
        )
    }

    fn lock(&self) -> MutexGuard<'_, Option<T::Handle>> {
        self.conn.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl<T: Transport> Drop for DrpcClient<T> {
    fn drop(&mut self) {
        let conn = self
            .conn
            .get_mut()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(handle) = conn.take() {
            if let Err(err) = self.transport.close(handle) {
                warn!(error = %err, "failed to close dRPC channel on drop");
            }
        }
    }
}

fn require_connected<H>(conn: &Option<H>) -> ApiResult<()> {
    if conn.is_none() {
        error!("dRPC not connected");
        return Err(Error::new(ErrorKind::Uninitialized).with_message("dRPC not connected"));
    }
    Ok(())
}

fn listener_path(listener: &dyn Listener) -> ApiResult<&str> {
    let path = listener.socket_path();
    path.to_str().ok_or_else(|| {
        Error::new(ErrorKind::InvalidArgument)
            .with_message("listener socket path is not valid utf-8")
            .with_path(path)
    })
}

/// Business status of a status-only reply; non-zero is forwarded as `Remote`.
fn check_status(response: &Response) -> ApiResult<()> {
    let status = unpack_status(&response.body)?;
    if status != 0 {
        error!(status, "dRPC request rejected by server");
        return Err(Error::remote(status).with_message("request rejected by server"));
    }
    Ok(())
}
