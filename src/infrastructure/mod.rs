//! Infrastructure Layer
//!
//! Cross-cutting concerns shared by the transport and the binary.

pub mod shutdown;

pub use shutdown::{shutdown_signal, SessionGuard, ShutdownController};
