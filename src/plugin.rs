//! Host-facing plugin
//!
//! The host engine drives [`CallStream`] through [`CallEventHandler`]. Every
//! callback reports a [`Disposition`] describing what happened internally;
//! none of them is a failure from the host's point of view, so a streaming
//! problem can never disturb the host's own call recording.

use std::sync::Arc;

use crate::config::PluginConfig;
use crate::error::Result;
use crate::network::{DispatchLoop, TransmitJob, TransmitStats, Transmitter};
use crate::protocol::CallMetadata;
use crate::streams::{
    assemble, talkgroup_candidates, Assembly, CallId, InsertOutcome, SessionStore,
    SubscriptionTable,
};

/// What the host knows about a live call
pub trait CallView {
    /// Host call number, stable for the call's lifetime
    fn call_num(&self) -> i64;
    fn short_name(&self) -> &str;
    fn talkgroup(&self) -> u64;
    /// Talkgroups currently patched with the call's talkgroup
    fn patched_talkgroups(&self) -> Vec<u64>;

    /// Talkgroups used for subscription matching
    fn talkgroup_candidates(&self) -> Vec<u64> {
        talkgroup_candidates(self.talkgroup(), &self.patched_talkgroups())
    }
}

/// Summary the host hands over when a call ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub sys_num: i32,
    pub talkgroup: u64,
    pub patched_talkgroups: Vec<u64>,
    /// Hz
    pub freq: u64,
    pub short_name: String,
    pub call_num: i64,
    pub start_time: i64,
    pub stop_time: i64,
}

impl CallInfo {
    pub fn metadata(&self) -> CallMetadata {
        CallMetadata {
            source: self.sys_num,
            talkgroup: self.talkgroup,
            patched_talkgroups: self.patched_talkgroups.clone(),
            frequency: self.freq,
            system_short_name: self.short_name.clone(),
            call_id: self.call_num,
            start_time: self.start_time,
            stop_time: self.stop_time,
        }
    }
}

impl CallView for CallInfo {
    fn call_num(&self) -> i64 {
        self.call_num
    }

    fn short_name(&self) -> &str {
        &self.short_name
    }

    fn talkgroup(&self) -> u64 {
        self.talkgroup
    }

    fn patched_talkgroups(&self) -> Vec<u64> {
        self.patched_talkgroups.clone()
    }
}

/// Recorder that produced an audio chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderInfo {
    pub num: u32,
}

/// Internal result of a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Call matches no subscription
    Ignored,
    /// New session created
    Created,
    /// Repeated call-start for a tracked call
    Duplicate,
    /// Samples appended to the session
    Appended,
    /// Event for a call with no session
    UnknownCall,
    /// Call ended without audio; session dropped
    DroppedEmpty,
    /// Record queued for transmission
    Dispatched,
    /// Call-end repeated for a call already assembled
    AlreadyEnded,
    /// Metadata could not be serialized; session dropped
    AssemblyFailed,
    /// Dispatch loop not accepting work; session dropped
    DispatchFailed,
    /// Session could not be stored
    InsertFailed,
}

/// Callbacks the host engine invokes
pub trait CallEventHandler: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self);
    /// May be invoked several times for one call
    fn call_start(&self, call: &dyn CallView) -> Disposition;
    fn audio_stream(
        &self,
        call: &dyn CallView,
        recorder: Option<&RecorderInfo>,
        samples: &[i16],
    ) -> Disposition;
    /// Invoked once per call
    fn call_end(&self, info: &CallInfo) -> Disposition;
}

/// Streams subscribed calls to their configured listeners
pub struct CallStream {
    table: Arc<SubscriptionTable>,
    dispatch: DispatchLoop,
}

impl CallStream {
    pub fn new(config: &PluginConfig) -> Self {
        Self::with_transmitter(config, Transmitter::new())
    }

    pub fn with_transmitter(config: &PluginConfig, transmitter: Transmitter) -> Self {
        Self {
            table: Arc::new(SubscriptionTable::from_config(config)),
            dispatch: DispatchLoop::new(transmitter),
        }
    }

    /// Build from the host's configuration object
    pub fn from_json(config: &serde_json::Value) -> Result<Self> {
        let config = PluginConfig::from_json(config).map_err(|e| {
            tracing::error!("invalid plugin configuration: {}", e);
            e
        })?;
        Ok(Self::new(&config))
    }

    pub fn table(&self) -> &Arc<SubscriptionTable> {
        &self.table
    }

    pub fn stats(&self) -> TransmitStats {
        self.dispatch.stats()
    }

    fn resolve(&self, call: &dyn CallView) -> Option<&Arc<SessionStore>> {
        let store = self
            .table
            .resolve(call.short_name(), &call.talkgroup_candidates());
        if store.is_none() {
            tracing::trace!(
                call_num = call.call_num(),
                system = call.short_name(),
                talkgroup = call.talkgroup(),
                "no subscription for call"
            );
        }
        store
    }
}

impl CallEventHandler for CallStream {
    fn start(&self) -> Result<()> {
        tracing::info!("starting call streamer");
        self.dispatch.start()?;
        tracing::info!(streams = self.table.len(), "call streamer started");
        Ok(())
    }

    fn stop(&self) {
        tracing::info!("stopping call streamer");
        self.dispatch.stop();
        tracing::info!("call streamer stopped");
    }

    fn call_start(&self, call: &dyn CallView) -> Disposition {
        let Some(store) = self.resolve(call) else {
            return Disposition::Ignored;
        };
        let call_id = CallId::from_call_num(call.call_num());

        match store.insert_if_absent(call_id.clone()) {
            Ok(InsertOutcome::Created) => {
                tracing::debug!(%call_id, "call_start: inserted session");
                Disposition::Created
            }
            Ok(InsertOutcome::AlreadyExists) => {
                tracing::debug!(%call_id, "call_start: session already exists");
                Disposition::Duplicate
            }
            Err(e) => {
                tracing::error!(%call_id, "call_start: {}", e);
                Disposition::InsertFailed
            }
        }
    }

    fn audio_stream(
        &self,
        call: &dyn CallView,
        recorder: Option<&RecorderInfo>,
        samples: &[i16],
    ) -> Disposition {
        let Some(store) = self.resolve(call) else {
            return Disposition::Ignored;
        };
        let call_id = CallId::from_call_num(call.call_num());

        let Some(session) = store.get(&call_id) else {
            tracing::warn!(%call_id, "audio_stream: call not found");
            return Disposition::UnknownCall;
        };
        let total = session.append_samples(samples);
        tracing::debug!(
            %call_id,
            recorder = ?recorder.map(|r| r.num),
            count = samples.len(),
            total,
            "audio_stream: appended samples"
        );
        Disposition::Appended
    }

    fn call_end(&self, info: &CallInfo) -> Disposition {
        let Some(store) = self.resolve(info) else {
            return Disposition::Ignored;
        };
        let call_id = CallId::from_call_num(info.call_num);

        let Some(session) = store.get(&call_id) else {
            tracing::warn!(%call_id, "call_end: call not found");
            return Disposition::UnknownCall;
        };

        match assemble(&session, &info.metadata()) {
            Ok(Assembly::Ready(frame)) => {
                let job = TransmitJob::new(store.clone(), call_id.clone(), frame);
                match self.dispatch.submit(job) {
                    Ok(()) => Disposition::Dispatched,
                    Err(e) => {
                        tracing::error!(%call_id, "call_end: {}", e);
                        Disposition::DispatchFailed
                    }
                }
            }
            Ok(Assembly::Empty) => {
                tracing::warn!(%call_id, "call_end: call has no samples");
                store.remove(&call_id);
                Disposition::DroppedEmpty
            }
            Ok(Assembly::AlreadyEnded) => {
                tracing::warn!(%call_id, "call_end: call already ended");
                Disposition::AlreadyEnded
            }
            Err(e) => {
                tracing::error!(%call_id, "call_end: failed to assemble record: {}", e);
                store.remove(&call_id);
                Disposition::AssemblyFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{FRAME_HEADER_LEN, FRAME_MAGIC};
    use crate::protocol::FrameHeader;
    use serde_json::json;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn info(call_num: i64, short_name: &str, talkgroup: u64) -> CallInfo {
        CallInfo {
            sys_num: 1,
            talkgroup,
            patched_talkgroups: vec![],
            freq: 851_012_500,
            short_name: short_name.to_string(),
            call_num,
            start_time: 1000,
            stop_time: 1010,
        }
    }

    fn plugin(port: u16) -> CallStream {
        CallStream::from_json(&json!({
            "address": "127.0.0.1",
            "port": port,
            "streams": [{ "TGID": 100, "shortName": "SYS1" }]
        }))
        .unwrap()
    }

    /// Accepts `calls` connections and returns every byte received on each
    fn listen(calls: usize) -> (u16, thread::JoinHandle<Vec<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            (0..calls)
                .map(|_| {
                    let (mut conn, _) = listener.accept().unwrap();
                    let mut bytes = Vec::new();
                    conn.read_to_end(&mut bytes).unwrap();
                    bytes
                })
                .collect()
        });
        (port, handle)
    }

    fn split_frame(bytes: &[u8]) -> (FrameHeader, CallMetadata, Vec<i16>) {
        let raw: [u8; FRAME_HEADER_LEN] = bytes[..FRAME_HEADER_LEN].try_into().unwrap();
        let header = FrameHeader::decode(&raw).unwrap();
        let json_end = FRAME_HEADER_LEN + header.json_length;
        let metadata = serde_json::from_slice(&bytes[FRAME_HEADER_LEN..json_end]).unwrap();
        let samples = bytes[json_end..]
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect();
        (header, metadata, samples)
    }

    #[test]
    fn test_invalid_config_aborts() {
        assert!(CallStream::from_json(&json!({ "address": "127.0.0.1", "port": 1 })).is_err());
    }

    #[test]
    fn test_unsubscribed_call_is_ignored() {
        let plugin = plugin(9);
        let other_tg = info(1, "SYS1", 200);
        let other_system = info(2, "SYS2", 100);

        for call in [&other_tg, &other_system] {
            assert_eq!(plugin.call_start(call), Disposition::Ignored);
            assert_eq!(plugin.audio_stream(call, None, &[1, 2]), Disposition::Ignored);
            assert_eq!(plugin.call_end(call), Disposition::Ignored);
        }
        assert_eq!(plugin.table().active_sessions(), 0);
        assert_eq!(plugin.stats(), TransmitStats::default());
    }

    #[test]
    fn test_repeated_call_start_creates_one_session() {
        let plugin = plugin(9);
        let call = info(42, "SYS1", 100);

        assert_eq!(plugin.call_start(&call), Disposition::Created);
        assert_eq!(plugin.call_start(&call), Disposition::Duplicate);
        assert_eq!(plugin.table().active_sessions(), 1);
    }

    #[test]
    fn test_events_for_unknown_call() {
        let plugin = plugin(9);
        let call = info(5, "SYS1", 100);
        assert_eq!(plugin.audio_stream(&call, None, &[1]), Disposition::UnknownCall);
        assert_eq!(plugin.call_end(&call), Disposition::UnknownCall);
    }

    #[test]
    fn test_empty_call_is_dropped() {
        let plugin = plugin(9);
        plugin.start().unwrap();
        let call = info(42, "SYS1", 100);

        plugin.call_start(&call);
        assert_eq!(plugin.call_end(&call), Disposition::DroppedEmpty);
        plugin.stop();

        assert_eq!(plugin.table().active_sessions(), 0);
        assert_eq!(plugin.stats(), TransmitStats::default());
    }

    #[test]
    fn test_call_end_without_running_loop_drops_session() {
        let plugin = plugin(9);
        let call = info(42, "SYS1", 100);
        plugin.call_start(&call);
        plugin.audio_stream(&call, None, &[1, 2, 3]);

        assert_eq!(plugin.call_end(&call), Disposition::DispatchFailed);
        assert_eq!(plugin.table().active_sessions(), 0);
    }

    #[test]
    fn test_completed_call_is_streamed() {
        let (port, server) = listen(1);
        let plugin = plugin(port);
        plugin.start().unwrap();

        let call = info(42, "SYS1", 100);
        assert_eq!(plugin.call_start(&call), Disposition::Created);
        let recorder = RecorderInfo { num: 3 };
        assert_eq!(plugin.audio_stream(&call, Some(&recorder), &[1, -1]), Disposition::Appended);
        assert_eq!(plugin.audio_stream(&call, Some(&recorder), &[2, -2]), Disposition::Appended);
        assert_eq!(plugin.call_end(&call), Disposition::Dispatched);
        plugin.stop();

        let received = server.join().unwrap();
        let (header, metadata, samples) = split_frame(&received[0]);
        assert_eq!(header.magic, FRAME_MAGIC);
        assert_eq!(header.sample_count, 4);
        assert_eq!(metadata, call.metadata());
        assert_eq!(samples, vec![1, -1, 2, -2]);
        assert_eq!(plugin.table().active_sessions(), 0);
        assert_eq!(plugin.stats().calls_sent, 1);
    }

    #[test]
    fn test_concurrent_audio_is_streamed_whole() {
        const THREADS: usize = 6;
        const CHUNKS: usize = 40;
        const CHUNK_LEN: usize = 128;

        let (port, server) = listen(1);
        let plugin = Arc::new(plugin(port));
        plugin.start().unwrap();

        let call = info(77, "SYS1", 100);
        plugin.call_start(&call);

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let plugin = plugin.clone();
                let call = call.clone();
                thread::spawn(move || {
                    for c in 0..CHUNKS {
                        let base = (t * CHUNKS + c) * CHUNK_LEN;
                        let chunk: Vec<i16> = (base..base + CHUNK_LEN).map(|v| v as i16).collect();
                        plugin.audio_stream(&call, None, &chunk);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(plugin.call_end(&call), Disposition::Dispatched);
        plugin.stop();

        let received = server.join().unwrap();
        let (header, _, samples) = split_frame(&received[0]);
        assert_eq!(header.sample_count as usize, THREADS * CHUNKS * CHUNK_LEN);
        assert_eq!(samples.len(), THREADS * CHUNKS * CHUNK_LEN);
        let mut bases = Vec::new();
        for chunk in samples.chunks(CHUNK_LEN) {
            assert_eq!(chunk[0] as usize % CHUNK_LEN, 0);
            for (i, &s) in chunk.iter().enumerate() {
                assert_eq!(s, chunk[0] + i as i16);
            }
            bases.push(chunk[0]);
        }
        bases.sort_unstable();
        bases.dedup();
        assert_eq!(bases.len(), THREADS * CHUNKS);
    }

    #[test]
    fn test_refused_server_still_cleans_up() {
        // Bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let plugin = plugin(port);
        plugin.start().unwrap();

        let call = info(42, "SYS1", 100);
        plugin.call_start(&call);
        plugin.audio_stream(&call, None, &[1, 2, 3, 4]);
        assert_eq!(plugin.call_end(&call), Disposition::Dispatched);
        // The worker may already have released the session
        assert!(matches!(
            plugin.call_end(&call),
            Disposition::AlreadyEnded | Disposition::UnknownCall
        ));
        plugin.stop();

        assert_eq!(plugin.table().active_sessions(), 0);
        let stats = plugin.stats();
        assert_eq!(stats.calls_sent, 0);
        assert_eq!(stats.failures + stats.disconnects, 1);
    }
}
