//! Three-part publish wire format
//!
//! Every published record becomes three length-prefixed parts on the wire:
//!
//! ```text
//! [u32 BE len][topic bytes]
//! [u32 BE len][JSON metadata bytes]
//! [u32 BE len][payload bytes]
//! ```
//!
//! Encoding produces a head buffer (topic and metadata parts plus the
//! payload length prefix) and hands the payload through as the record's own
//! `Bytes`, so payload bytes are never copied into the frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use edgeflow_core::{Metadata, Record};

/// Upper bound for any single part. Oversized parts indicate a corrupt or
/// hostile stream.
pub const MAX_PART_SIZE: u32 = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame part of {0} bytes exceeds the {MAX_PART_SIZE} byte limit")]
    PartTooLarge(u32),

    #[error("topic part is not valid UTF-8")]
    InvalidTopic,

    #[error("metadata part is not valid JSON: {0}")]
    InvalidMetadata(#[from] serde_json::Error),
}

/// A decoded three-part message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub metadata: Metadata,
    pub payload: Bytes,
}

/// Encodes a record into `(head, payload)`; writing both buffers in order
/// emits one complete frame.
pub fn encode_parts(record: &Record) -> Result<(Bytes, Bytes), serde_json::Error> {
    let metadata = serde_json::to_vec(&record.metadata)?;
    let topic = record.topic.as_bytes();

    let mut head = BytesMut::with_capacity(3 * LEN_PREFIX + topic.len() + metadata.len());
    head.put_u32(topic.len() as u32);
    head.put_slice(topic);
    head.put_u32(metadata.len() as u32);
    head.put_slice(&metadata);
    head.put_u32(record.payload.len() as u32);

    Ok((head.freeze(), record.payload.clone()))
}

/// Incrementally decodes one frame from `buf`.
///
/// Returns `Ok(None)` until a complete frame is buffered; consumed bytes are
/// advanced out of `buf` only when a whole frame is taken.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    let mut offset = 0usize;
    let mut parts: [(usize, usize); 3] = [(0, 0); 3];

    for part in &mut parts {
        if buf.len() < offset + LEN_PREFIX {
            return Ok(None);
        }
        let len = u32::from_be_bytes(buf[offset..offset + LEN_PREFIX].try_into().unwrap());
        if len > MAX_PART_SIZE {
            return Err(FrameError::PartTooLarge(len));
        }
        let start = offset + LEN_PREFIX;
        if buf.len() < start + len as usize {
            return Ok(None);
        }
        *part = (start, len as usize);
        offset = start + len as usize;
    }

    let topic = std::str::from_utf8(&buf[parts[0].0..parts[0].0 + parts[0].1])
        .map_err(|_| FrameError::InvalidTopic)?
        .to_string();
    let metadata: Metadata =
        serde_json::from_slice(&buf[parts[1].0..parts[1].0 + parts[1].1])?;

    let mut frame_bytes = buf.split_to(offset);
    frame_bytes.advance(parts[2].0);
    let payload = frame_bytes.freeze();

    Ok(Some(Frame {
        topic,
        metadata,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeflow_core::Value;

    #[test]
    fn encode_shares_the_payload_allocation() {
        let record = Record::new("camera1")
            .with_field("idx", 3i64)
            .with_payload(vec![9u8; 256]);
        let (_, payload) = encode_parts(&record).unwrap();
        assert_eq!(payload.as_ptr(), record.payload.as_ptr());
    }

    #[test]
    fn decode_waits_for_a_complete_frame() {
        let record = Record::new("camera1")
            .with_field("cam_sn", "B1")
            .with_payload(&b"jpeg"[..]);
        let (head, payload) = encode_parts(&record).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&head);
        // Payload still missing: not decodable yet.
        assert!(decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&payload);
        let frame = decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(frame.topic, "camera1");
        assert_eq!(frame.metadata.get("cam_sn"), Some(&Value::from("B1")));
        assert_eq!(&frame.payload[..], b"jpeg");
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_part_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_PART_SIZE + 1);
        assert!(matches!(
            decode(&mut buf),
            Err(FrameError::PartTooLarge(_))
        ));
    }
}
