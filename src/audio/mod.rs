//! Audio subsystem module

pub mod buffer;

pub use buffer::SampleBuffer;
