//! Native-messaging framing between the browser extension and the tracker host.

pub mod message;

use rd_core::TrackerError;
use rd_core::TrackerResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;

pub use message::ExtensionMessage;
pub use message::HostMessage;
pub use message::TabReplyOutcome;

const FRAME_PREFIX_BYTES: usize = 4;
/// Browsers reject host-to-extension messages above 1 MiB.
const DEFAULT_MAX_OUTBOUND_BYTES: usize = 1024 * 1024;
const HARD_MAX_INBOUND_BYTES: usize = 64 * 1024 * 1024;

/// Per-direction frame size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_inbound_bytes: usize,
    pub max_outbound_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_inbound_bytes: HARD_MAX_INBOUND_BYTES,
            max_outbound_bytes: DEFAULT_MAX_OUTBOUND_BYTES,
        }
    }
}

impl FrameLimits {
    pub fn validate(&self) -> TrackerResult<()> {
        if self.max_inbound_bytes == 0 || self.max_outbound_bytes == 0 {
            return Err(TrackerError::new(
                "ipc.max_message_bytes_invalid",
                "frame limits must be greater than zero",
            ));
        }

        if self.max_inbound_bytes > HARD_MAX_INBOUND_BYTES {
            return Err(TrackerError::new(
                "ipc.max_message_bytes_too_large",
                "inbound frame limit exceeds hard limit (64 MiB)",
            ));
        }

        if self.max_outbound_bytes > DEFAULT_MAX_OUTBOUND_BYTES {
            return Err(TrackerError::new(
                "ipc.max_message_bytes_too_large",
                "outbound frame limit exceeds the browser limit (1 MiB)",
            ));
        }

        Ok(())
    }
}

/// Encodes a payload behind a 4-byte little-endian length prefix.
pub fn encode_frame(payload: &[u8], max_message_bytes: usize) -> TrackerResult<Vec<u8>> {
    if payload.len() > max_message_bytes {
        return Err(TrackerError::new(
            "ipc.message_too_large",
            format!(
                "payload exceeds max_message_bytes ({} > {})",
                payload.len(),
                max_message_bytes
            ),
        ));
    }

    let len_u32 = u32::try_from(payload.len()).map_err(|_| {
        TrackerError::new(
            "ipc.message_too_large",
            "payload length does not fit in 32-bit frame prefix",
        )
    })?;

    let mut out = Vec::with_capacity(FRAME_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&len_u32.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes one complete frame and validates its length.
pub fn decode_frame(frame: &[u8], max_message_bytes: usize) -> TrackerResult<Vec<u8>> {
    if frame.len() < FRAME_PREFIX_BYTES {
        return Err(TrackerError::new(
            "ipc.frame_too_short",
            "frame is shorter than the 4-byte length prefix",
        ));
    }

    let mut len_bytes = [0_u8; FRAME_PREFIX_BYTES];
    len_bytes.copy_from_slice(&frame[..FRAME_PREFIX_BYTES]);
    let payload_len = checked_payload_len(len_bytes, max_message_bytes)?;

    let expected = FRAME_PREFIX_BYTES + payload_len;
    if frame.len() != expected {
        return Err(TrackerError::new(
            "ipc.frame_length_mismatch",
            format!(
                "frame length mismatch: expected {expected} bytes, got {}",
                frame.len()
            ),
        ));
    }

    Ok(frame[FRAME_PREFIX_BYTES..].to_vec())
}

/// Reads the next frame from a stream; `None` on a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R, max_message_bytes: usize) -> TrackerResult<Option<Vec<u8>>> {
    let mut len_bytes = [0_u8; FRAME_PREFIX_BYTES];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => {
            return Err(TrackerError::new(
                "ipc.read_failed",
                format!("failed to read frame prefix: {error}"),
            ));
        }
    }

    let payload_len = checked_payload_len(len_bytes, max_message_bytes)?;
    let mut payload = vec![0_u8; payload_len];
    reader.read_exact(&mut payload).map_err(|error| {
        TrackerError::new(
            "ipc.message_truncated",
            format!("stream ended inside a {payload_len}-byte frame: {error}"),
        )
    })?;
    Ok(Some(payload))
}

pub fn write_frame<W: Write>(
    writer: &mut W,
    payload: &[u8],
    max_message_bytes: usize,
) -> TrackerResult<()> {
    let frame = encode_frame(payload, max_message_bytes)?;
    writer
        .write_all(&frame)
        .and_then(|()| writer.flush())
        .map_err(|error| {
            TrackerError::new("ipc.write_failed", format!("failed to write frame: {error}"))
        })
}

/// Serializes `message` as JSON and frames it.
pub fn encode_message<T: Serialize>(message: &T, max_message_bytes: usize) -> TrackerResult<Vec<u8>> {
    encode_frame(&encode_payload(message)?, max_message_bytes)
}

/// Serializes `message` as JSON and writes it as one frame.
pub fn write_message<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
    max_message_bytes: usize,
) -> TrackerResult<()> {
    write_frame(writer, &encode_payload(message)?, max_message_bytes)
}

fn encode_payload<T: Serialize>(message: &T) -> TrackerResult<Vec<u8>> {
    serde_json::to_vec(message).map_err(|error| {
        TrackerError::new(
            "ipc.message_encode_failed",
            format!("failed to encode message: {error}"),
        )
    })
}

pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> TrackerResult<T> {
    if payload.is_empty() {
        return Err(TrackerError::new("ipc.message_empty", "message payload is empty"));
    }

    serde_json::from_slice(payload).map_err(|error| {
        TrackerError::new(
            "ipc.message_decode_failed",
            format!("failed to decode message: {error}"),
        )
    })
}

/// Decodes a framed JSON message.
pub fn decode_message<T: DeserializeOwned>(frame: &[u8], max_message_bytes: usize) -> TrackerResult<T> {
    decode_payload(&decode_frame(frame, max_message_bytes)?)
}

fn checked_payload_len(len_bytes: [u8; FRAME_PREFIX_BYTES], max_message_bytes: usize) -> TrackerResult<usize> {
    let payload_len = u32::from_le_bytes(len_bytes) as usize;
    if payload_len > max_message_bytes {
        return Err(TrackerError::new(
            "ipc.message_too_large",
            format!(
                "decoded payload exceeds max_message_bytes ({} > {})",
                payload_len, max_message_bytes
            ),
        ));
    }
    Ok(payload_len)
}
