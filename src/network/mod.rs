//! Network subsystem for TCP call delivery

pub mod dispatch;
pub mod transmitter;

pub use dispatch::DispatchLoop;
pub use transmitter::{SendOutcome, SessionRelease, TransmitJob, TransmitStats, Transmitter};
