//! In-flight call sessions

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::audio::SampleBuffer;
use crate::streams::subscription::Subscription;

/// Store key for a call, derived from the host's numeric call id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

impl CallId {
    pub fn from_call_num(call_num: i64) -> Self {
        Self(call_num.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One call between call-start and transmission
#[derive(Debug)]
pub struct Session {
    id: CallId,
    stream: Arc<Subscription>,
    /// Set exactly once, when the call's record is assembled
    metadata_json: OnceLock<String>,
    audio: SampleBuffer,
}

impl Session {
    pub fn new(id: CallId, stream: Arc<Subscription>) -> Self {
        Self {
            id,
            stream,
            metadata_json: OnceLock::new(),
            audio: SampleBuffer::new(),
        }
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    pub fn stream(&self) -> &Arc<Subscription> {
        &self.stream
    }

    pub fn audio(&self) -> &SampleBuffer {
        &self.audio
    }

    /// Append a chunk of audio, returns the running sample count
    pub fn append_samples(&self, samples: &[i16]) -> u32 {
        self.audio.append(samples)
    }

    pub fn sample_count(&self) -> u32 {
        self.audio.len()
    }

    /// Serialized metadata, present once the call has ended
    pub fn metadata_json(&self) -> Option<&str> {
        self.metadata_json.get().map(String::as_str)
    }

    pub fn is_ended(&self) -> bool {
        self.metadata_json.get().is_some()
    }

    /// Record the serialized metadata; fails if the call already ended
    pub(crate) fn mark_ended(&self, metadata_json: String) -> Result<(), String> {
        self.metadata_json.set(metadata_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> Arc<Subscription> {
        Arc::new(Subscription::new(100, "SYS1", "127.0.0.1:9123".parse().unwrap()))
    }

    #[test]
    fn test_call_id_is_decimal() {
        assert_eq!(CallId::from_call_num(42).as_str(), "42");
        assert_eq!(CallId::from_call_num(-7).to_string(), "-7");
        assert_eq!(CallId::from_call_num(42), CallId::from_call_num(42));
    }

    #[test]
    fn test_session_ends_once() {
        let session = Session::new(CallId::from_call_num(1), subscription());
        assert!(!session.is_ended());
        assert!(session.metadata_json().is_none());

        session.mark_ended("{}".to_string()).unwrap();
        assert!(session.is_ended());
        assert_eq!(session.metadata_json(), Some("{}"));
        assert!(session.mark_ended("{\"again\":1}".to_string()).is_err());
        assert_eq!(session.metadata_json(), Some("{}"));
    }

    #[test]
    fn test_append_samples() {
        let session = Session::new(CallId::from_call_num(1), subscription());
        session.append_samples(&[1, 2, 3]);
        session.append_samples(&[4]);
        assert_eq!(session.sample_count(), 4);
        assert_eq!(session.audio().snapshot(), vec![1, 2, 3, 4]);
    }
}
