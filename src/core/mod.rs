// Core modules implementing the dRPC envelope, transport seam, call execution, and errors.
pub(crate) mod alloc;
pub mod error;
pub mod executor;
pub mod messages;
pub mod ranks;
pub mod ras;
pub mod transport;
pub mod wire;
