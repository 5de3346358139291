//! Purpose: Define the public Rust API boundary for the engine dRPC bridge.
//! Exports: Session, collaborator traits, event/rank types, transport seam, and errors.
//! Role: Single import path for engine subsystems and the CLI.
//! Invariants: Core marshaling and allocation helpers stay crate-internal.

mod client;

pub use crate::config::{DrpcConfig, EngineInfo, default_socket_dir, total_contexts};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::ranks::{PoolId, Rank, RankList};
pub use crate::core::ras::{EventType, ExtendedInfo, PoolSvcInfo, RasEvent, Severity};
pub use crate::core::transport::{Transport, UnixConnection, UnixTransport};
pub use crate::core::wire::{Call, MethodId, ModuleId, Response, Status, registry};
pub use client::{
    Addressing, ApiResult, DrpcClient, Listener, MediaErrorKind, POOL_SVC_RANKS_UPDATE,
    StaticAddressing, StaticListener,
};
