//! Connection handles, the upgrade gate, the per-connection message pipeline,
//! and broadcast fan-out.

pub mod broadcast;
pub mod connection;
pub mod gate;
pub mod pipeline;
pub mod session;
