//! Record assembly at call end

use crate::error::Result;
use crate::protocol::{CallMetadata, Frame};
use crate::streams::session::Session;

/// What call-end assembly produced
#[derive(Debug)]
pub enum Assembly {
    /// Frame ready to transmit
    Ready(Frame),
    /// No audio was accumulated, nothing to send
    Empty,
    /// The session was already assembled by an earlier call-end
    AlreadyEnded,
}

/// Build the wire frame for a finished call
///
/// Runs under the session's exclusive sample lock, so a last audio chunk
/// racing with call-end is either fully included or lands after the frame
/// was built (and is then discarded with the session). Fails if the metadata
/// cannot be serialized or the call is too long for the frame header.
pub fn assemble(session: &Session, metadata: &CallMetadata) -> Result<Assembly> {
    session.audio().seal(|samples| {
        if session.is_ended() {
            return Ok(Assembly::AlreadyEnded);
        }
        if samples.is_empty() {
            return Ok(Assembly::Empty);
        }

        let json = metadata.to_json()?;
        let frame = Frame::new(json.clone(), samples)?;
        if session.mark_ended(json).is_err() {
            return Ok(Assembly::AlreadyEnded);
        }
        Ok(Assembly::Ready(frame))
    })
}
