//! Purpose: Resolve the daemon socket location and describe this engine instance.
//! Exports: `DrpcConfig`, `EngineInfo`, `default_socket_dir`, `total_contexts`.
//! Role: Keep CLI and library socket-path rules aligned from one source.
//! Invariants: The daemon socket is always `<socket_dir>/daos_server.sock`.
//! Invariants: `DAOS_SOCKET_DIR` overrides the default directory when set and non-empty.

use std::path::{Path, PathBuf};

pub const SERVER_SOCKET_NAME: &str = "daos_server.sock";
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/daos_server";
pub const SOCKET_DIR_ENV: &str = "DAOS_SOCKET_DIR";

/// Contexts every engine runs besides its targets (system and SWIM xstreams).
pub const SYS_CONTEXTS: u32 = 2;

pub fn default_socket_dir() -> PathBuf {
    match std::env::var_os(SOCKET_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_SOCKET_DIR),
    }
}

pub fn total_contexts(num_targets: u32, num_helpers: u32) -> u32 {
    SYS_CONTEXTS
        .saturating_add(num_targets)
        .saturating_add(num_helpers)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DrpcConfig {
    socket_dir: PathBuf,
}

impl DrpcConfig {
    pub fn new() -> Self {
        Self {
            socket_dir: default_socket_dir(),
        }
    }

    pub fn with_socket_dir(mut self, socket_dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = socket_dir.into();
        self
    }

    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(SERVER_SOCKET_NAME)
    }
}

impl Default for DrpcConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EngineInfo {
    pub instance_idx: u32,
    pub num_targets: u32,
    pub num_helpers: u32,
}

impl EngineInfo {
    pub fn new(instance_idx: u32, num_targets: u32) -> Self {
        Self {
            instance_idx,
            num_targets,
            num_helpers: 0,
        }
    }

    pub fn with_helpers(mut self, num_helpers: u32) -> Self {
        self.num_helpers = num_helpers;
        self
    }

    pub fn num_contexts(&self) -> u32 {
        total_contexts(self.num_targets, self.num_helpers)
    }
}
