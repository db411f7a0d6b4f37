// src/recovery/mod.rs - Threshold recovery: requests, coordination, inbound dispatch

pub mod coordinator;
pub mod handler;
pub mod request;
pub mod status;

pub use coordinator::RecoveryCoordinator;
pub use handler::{HandleOutcome, InboundHandler};
pub use request::{RecoveryRequest, RecoveryResponse, RecoveryStatus, ResponseStatus};
pub use status::RecoveryStatusView;
