//! Newline-delimited JSON wire format for stream bodies.
//!
//! Every response body line is one record. Chunk payloads are base64 on the
//! wire only; the store and the engine carry raw bytes throughout.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use restream_engine::{StreamFrame, StreamState};
use serde::{Deserialize, Serialize};

/// One line of an NDJSON stream body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireRecord {
    /// A sequenced chunk, payload base64-encoded
    Chunk {
        /// Position of the chunk within the stream
        seq: u64,
        /// Base64 of the raw persisted payload
        payload: String,
    },
    /// Terminal sentinel; the last record of a body
    End {
        /// Stream state at close time; `running` means the body is done but
        /// the stream is not (no live producer)
        state: StreamState,
        /// Error message when the stream failed
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl WireRecord {
    /// Build the wire record for one reader frame.
    pub fn from_frame(frame: StreamFrame) -> Self {
        match frame {
            StreamFrame::Chunk { seq, payload } => Self::Chunk {
                seq,
                payload: STANDARD.encode(&payload),
            },
            StreamFrame::End { state, message } => Self::End {
                state,
                error: message,
            },
        }
    }

    /// Serialize as one newline-terminated line.
    pub fn encode_line(&self) -> Result<Bytes, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }

    /// Decode the chunk payload back to raw bytes; `None` for end records.
    pub fn payload_bytes(&self) -> Option<Result<Bytes, base64::DecodeError>> {
        match self {
            Self::Chunk { payload, .. } => {
                Some(STANDARD.decode(payload).map(Bytes::from))
            }
            Self::End { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_record_round_trips_payload_bytes() {
        let frame = StreamFrame::Chunk {
            seq: 3,
            payload: Bytes::from_static(b"\x00raw bytes\xff"),
        };
        let record = WireRecord::from_frame(frame);
        let line = record.encode_line().unwrap();
        assert!(line.ends_with(b"\n"));

        let parsed: WireRecord = serde_json::from_slice(&line).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(
            parsed.payload_bytes().unwrap().unwrap(),
            Bytes::from_static(b"\x00raw bytes\xff")
        );
    }

    #[test]
    fn end_record_wire_shape() {
        let completed = WireRecord::from_frame(StreamFrame::End {
            state: StreamState::Completed,
            message: None,
        });
        assert_eq!(
            String::from_utf8(completed.encode_line().unwrap().to_vec()).unwrap(),
            "{\"type\":\"end\",\"state\":\"completed\"}\n"
        );

        let failed = WireRecord::from_frame(StreamFrame::End {
            state: StreamState::Failed,
            message: Some("boom".into()),
        });
        assert_eq!(
            String::from_utf8(failed.encode_line().unwrap().to_vec()).unwrap(),
            "{\"type\":\"end\",\"state\":\"failed\",\"error\":\"boom\"}\n"
        );
    }

    #[test]
    fn chunk_record_wire_shape() {
        let record = WireRecord::from_frame(StreamFrame::Chunk {
            seq: 0,
            payload: Bytes::from_static(b"hi"),
        });
        assert_eq!(
            String::from_utf8(record.encode_line().unwrap().to_vec()).unwrap(),
            "{\"type\":\"chunk\",\"seq\":0,\"payload\":\"aGk=\"}\n"
        );
    }
}
