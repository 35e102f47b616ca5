//! Viewer side: signaling, per-viewer lifecycle and the connected count.

pub mod counter;
pub mod registry;
pub mod session;
pub mod signaling;
