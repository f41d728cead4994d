//! Per-call sample accumulator
//!
//! Every session owns one `SampleBuffer`. Producers append chunks of 16-bit
//! PCM from whatever thread the host calls us on; the buffer's own lock keeps
//! appends to one call from contending with lookups on any other call.
//!
//! There is no cap on growth. A call that never ends keeps growing.

use parking_lot::RwLock;

#[derive(Debug, Default)]
struct Accumulated {
    /// Samples appended so far, in arrival order
    samples: Vec<i16>,
    /// Running total of appended samples
    sample_count: u32,
}

/// Append-only i16 sample buffer guarded by a session-local lock
#[derive(Debug, Default)]
pub struct SampleBuffer {
    inner: RwLock<Accumulated>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk, preserving its internal order
    ///
    /// Returns the total number of samples after the append.
    pub fn append(&self, chunk: &[i16]) -> u32 {
        let mut inner = self.inner.write();
        inner.samples.extend_from_slice(chunk);
        let added = u32::try_from(chunk.len()).unwrap_or(u32::MAX);
        inner.sample_count = inner.sample_count.saturating_add(added);
        inner.sample_count
    }

    /// Number of samples accumulated so far
    pub fn len(&self) -> u32 {
        self.inner.read().sample_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current samples
    pub fn snapshot(&self) -> Vec<i16> {
        self.inner.read().samples.clone()
    }

    /// Run `f` over the samples while holding the exclusive lock
    ///
    /// No append can interleave with `f`, so whatever `f` builds reflects
    /// every chunk delivered before the call ended.
    pub fn seal<R>(&self, f: impl FnOnce(&[i16]) -> R) -> R {
        let inner = self.inner.write();
        if inner.sample_count as usize != inner.samples.len() {
            tracing::warn!(
                counted = inner.sample_count,
                stored = inner.samples.len(),
                "sample count disagrees with stored samples"
            );
        }
        f(&inner.samples)
    }
}
