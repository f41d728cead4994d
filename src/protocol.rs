//! Wire protocol for completed calls
//!
//! One frame per call, on its own TCP connection, no acknowledgement:
//!
//! ```text
//! ┌───────┬─────────────┬──────────────┬───────────────┬──────────────────┐
//! │ magic │ json_length │ sample_count │ metadata JSON │ samples          │
//! │  i32  │    usize    │     i32      │ json_length B │ i16 × sample_cnt │
//! └───────┴─────────────┴──────────────┴───────────────┴──────────────────┘
//! ```
//!
//! All integers are in host byte order, `json_length` is pointer-width.
//! Receivers are expected to run on the same architecture as the sender.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{FRAME_HEADER_LEN, FRAME_MAGIC, MAX_METADATA_LEN, MAX_SAMPLE_COUNT};
use crate::error::ProtocolError;

/// Metadata object carried in every frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMetadata {
    /// Source system number
    #[serde(rename = "Source")]
    pub source: i32,
    #[serde(rename = "Talkgroup")]
    pub talkgroup: u64,
    #[serde(rename = "PatchedTalkgroups")]
    pub patched_talkgroups: Vec<u64>,
    /// Frequency in Hz
    #[serde(rename = "Frequency")]
    pub frequency: u64,
    #[serde(rename = "SystemShortName")]
    pub system_short_name: String,
    #[serde(rename = "CallId")]
    pub call_id: i64,
    /// Epoch seconds
    #[serde(rename = "StartTime")]
    pub start_time: i64,
    /// Epoch seconds
    #[serde(rename = "StopTime")]
    pub stop_time: i64,
}

impl CallMetadata {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Fixed-size frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: i32,
    pub json_length: usize,
    pub sample_count: i32,
}

impl FrameHeader {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN);
        buf.put_i32_ne(self.magic);
        buf.put_slice(&self.json_length.to_ne_bytes());
        buf.put_i32_ne(self.sample_count);
        buf.freeze()
    }

    /// Parse and validate a header
    pub fn decode(raw: &[u8; FRAME_HEADER_LEN]) -> Result<Self, ProtocolError> {
        let mut buf = &raw[..];
        let magic = buf.get_i32_ne();
        let mut len_bytes = [0u8; std::mem::size_of::<usize>()];
        buf.copy_to_slice(&mut len_bytes);
        let json_length = usize::from_ne_bytes(len_bytes);
        let sample_count = buf.get_i32_ne();

        if magic != FRAME_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        if sample_count < 0 {
            return Err(ProtocolError::NegativeSampleCount(sample_count));
        }
        if json_length > MAX_METADATA_LEN {
            return Err(ProtocolError::MetadataTooLarge(json_length));
        }
        if sample_count as usize > MAX_SAMPLE_COUNT {
            return Err(ProtocolError::TooManySamples(sample_count as usize));
        }
        Ok(Self {
            magic,
            json_length,
            sample_count,
        })
    }
}

/// An assembled call frame, kept as three separate regions
///
/// The regions are never concatenated; the transmitter hands them to the
/// socket as one gathered write.
#[derive(Debug, Clone)]
pub struct Frame {
    header: FrameHeader,
    header_bytes: Bytes,
    metadata: Bytes,
    samples: Bytes,
}

impl Frame {
    /// Build a frame from serialized metadata and the call's samples
    ///
    /// Fails when the sample count does not fit the header's `i32` field.
    pub fn new(metadata_json: String, samples: &[i16]) -> Result<Self, ProtocolError> {
        let sample_count = header_sample_count(samples.len())?;
        let mut pcm = BytesMut::with_capacity(samples.len() * 2);
        for &sample in samples {
            pcm.put_i16_ne(sample);
        }

        let header = FrameHeader {
            magic: FRAME_MAGIC,
            json_length: metadata_json.len(),
            sample_count,
        };

        Ok(Self {
            header,
            header_bytes: header.encode(),
            metadata: Bytes::from(metadata_json),
            samples: pcm.freeze(),
        })
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    /// Raw sample region
    pub fn sample_bytes(&self) -> &[u8] {
        &self.samples
    }

    /// Total number of bytes on the wire
    pub fn total_len(&self) -> usize {
        self.header_bytes.len() + self.metadata.len() + self.samples.len()
    }

    /// The frame as a chained buffer suitable for vectored writes
    pub fn into_buf(self) -> impl Buf {
        self.header_bytes.chain(self.metadata).chain(self.samples)
    }
}

fn header_sample_count(len: usize) -> Result<i32, ProtocolError> {
    i32::try_from(len).map_err(|_| ProtocolError::TooManySamples(len))
}

/// A frame read back off the wire
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub header: FrameHeader,
    pub metadata: CallMetadata,
    pub samples: Vec<i16>,
}

/// Read one frame from `reader`
pub async fn read_frame<R>(reader: &mut R) -> Result<DecodedFrame, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut raw).await?;
    let header = FrameHeader::decode(&raw)?;

    let mut json = vec![0u8; header.json_length];
    reader.read_exact(&mut json).await?;
    let metadata: CallMetadata = serde_json::from_slice(&json)?;

    let mut pcm = vec![0u8; header.sample_count as usize * 2];
    reader.read_exact(&mut pcm).await?;
    let samples = pcm
        .chunks_exact(2)
        .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
        .collect();

    Ok(DecodedFrame {
        header,
        metadata,
        samples,
    })
}
