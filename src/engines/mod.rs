//! Network engine implementations.
//!
//! Each engine implements [`NetworkEngine`](crate::engine::NetworkEngine)
//! and is registered by name in the
//! [`EngineRegistry`](crate::engine::EngineRegistry).

pub mod vpp;

pub use self::vpp::{VppCli, VppCtl, VppEngine};
