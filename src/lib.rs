//! # Call Streamer
//!
//! Buffers the audio of subscribed radio calls and ships every completed
//! call to a remote TCP listener as one framed binary record.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        HOST ENGINE (call tracking)                           │
//! │     call_start(call)       audio_stream(call, samples)      call_end(info)   │
//! └──────────┬─────────────────────────┬─────────────────────────────┬──────────┘
//!            │ any thread              │ any thread                  │ any thread
//! ┌──────────┼─────────────────────────┼─────────────────────────────┼──────────┐
//! │          ▼                         ▼                             ▼          │
//! │  ┌─────────────────────────────────────────────────────────────────────┐   │
//! │  │             Subscription Table (streams::subscription)              │   │
//! │  │    [TGID | shortName] ──► Stream 0 │ Stream 1 │ ... │ Stream N      │   │
//! │  └─────────────────────────────────────────────────────────────────────┘   │
//! │             │                        │                             │        │
//! │             ▼                        ▼                             ▼        │
//! │  ┌─────────────────────────────────────────────────────────────────────┐   │
//! │  │              Session Store (streams::store), one per stream          │   │
//! │  │   RwLock<HashMap<CallId, Arc<Session>>>                              │   │
//! │  │      ┌───────────────┐   ┌───────────────┐   ┌───────────────┐      │   │
//! │  │      │ Session 4711  │   │ Session 4712  │   │ Session 4713  │      │   │
//! │  │      │ SampleBuffer  │   │ SampleBuffer  │   │ SampleBuffer  │      │   │
//! │  │      └───────────────┘   └───────────────┘   └───────┬───────┘      │   │
//! │  └──────────────────────────────────────────────────────┼──────────────┘   │
//! │                                                          │ call_end         │
//! │                                                          ▼                  │
//! │  ┌─────────────────────────────────────────────────────────────────────┐   │
//! │  │               Record Assembler (streams::record)                    │   │
//! │  │      Frame: [magic | json_length | sample_count | JSON | PCM]       │   │
//! │  └──────────────────────────────────┬──────────────────────────────────┘   │
//! │                                     │ mpsc queue                            │
//! │                                     ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────────────────┐   │
//! │  │   Dispatch Loop (network::dispatch) - single worker thread           │   │
//! │  │   Transmitter (network::transmitter) - connect 1s, gathered write    │   │
//! │  └──────────────────────────────────┬──────────────────────────────────┘   │
//! └─────────────────────────────────────┼───────────────────────────────────────┘
//!                                       │ TCP, one connection per call
//!                                       ▼
//!                              ┌─────────────────┐
//!                              │  Remote sink    │
//!                              └─────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod plugin;
pub mod protocol;
pub mod streams;

pub use error::{Error, Result};
pub use plugin::{CallEventHandler, CallInfo, CallStream, CallView, Disposition, RecorderInfo};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Magic number opening every call frame ('PZZA' read as a little-endian i32)
    pub const FRAME_MAGIC: i32 = 0x415A_5A50;

    /// Connect attempts are abandoned after this long
    pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

    /// Size of the fixed frame header: magic, json_length, sample_count
    pub const FRAME_HEADER_LEN: usize =
        std::mem::size_of::<i32>() + std::mem::size_of::<usize>() + std::mem::size_of::<i32>();

    /// Upper bound accepted by the frame decoder for the metadata region
    pub const MAX_METADATA_LEN: usize = 1024 * 1024;

    /// Upper bound accepted by the frame decoder for the sample region
    /// (about 4.6 hours at 8 kHz, 256 MiB of PCM)
    pub const MAX_SAMPLE_COUNT: usize = 1 << 27;

    /// Sample rate assumed when reporting call durations
    pub const DISPLAY_SAMPLE_RATE: u32 = 8000;

    /// Name of the dispatch worker thread
    pub const DISPATCH_THREAD_NAME: &str = "callstream-io";
}
