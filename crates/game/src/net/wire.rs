//! Framing for the batched server stream and the per-message client stream.
//!
//! Server frame: a fixed header carrying a tick-adjustment piggyback and a
//! size field whose high bit flags zstd compression, followed by a payload
//! of concatenated message records. Client frame: a one-byte adjustment
//! iteration echo followed by exactly one message record. A record is a
//! type tag, a big-endian body length, and a bincode-encoded body.

use thiserror::Error;

use super::messages::{Message, MessageType};
use crate::config::SharedConfig;

/// Server batch header: i8 adjustment, u8 iteration, u16 size-and-flag.
pub const SERVER_HEADER_SIZE: usize = 4;
/// Message record header: u8 type, u16 big-endian body length.
pub const MESSAGE_HEADER_SIZE: usize = 3;
/// Client header: u8 adjustment iteration echo.
pub const CLIENT_HEADER_SIZE: usize = 1;

/// High bit of the size field marks the payload as compressed.
const COMPRESSION_FLAG: u16 = 1 << 15;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed batch header")]
    BadHeader,
    #[error("unknown message type tag: {0}")]
    BadMessageType(u8),
    #[error("message size exceeds frame bounds (offset {offset}, size {size}, frame {frame})")]
    SizeExceedsFrame {
        offset: usize,
        size: usize,
        frame: usize,
    },
    #[error("batch decompression failed")]
    DecompressionFailed(#[source] std::io::Error),
    #[error("message body parse failed")]
    BodyParseFailed(#[source] bincode::Error),
}

/// The decoded fields of a server batch header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHeader {
    pub adjustment: i8,
    pub iteration: u8,
    pub payload_len: usize,
    pub compressed: bool,
}

impl ServerHeader {
    pub fn encode(&self) -> [u8; SERVER_HEADER_SIZE] {
        let mut size_and_flag = self.payload_len as u16;
        if self.compressed {
            size_and_flag |= COMPRESSION_FLAG;
        }
        let size_bytes = size_and_flag.to_be_bytes();
        [
            self.adjustment as u8,
            self.iteration,
            size_bytes[0],
            size_bytes[1],
        ]
    }

    pub fn decode(bytes: &[u8], config: &SharedConfig) -> Result<Self, WireError> {
        if bytes.len() != SERVER_HEADER_SIZE {
            return Err(WireError::BadHeader);
        }

        let size_and_flag = u16::from_be_bytes([bytes[2], bytes[3]]);
        let payload_len = (size_and_flag & !COMPRESSION_FLAG) as usize;
        if payload_len > config.max_batch_size {
            return Err(WireError::BadHeader);
        }

        Ok(Self {
            adjustment: bytes[0] as i8,
            iteration: bytes[1],
            payload_len,
            compressed: (size_and_flag & COMPRESSION_FLAG) != 0,
        })
    }
}

/// Serializes a message into a framed record: type tag, length, body.
pub fn encode_message<M: Message>(
    message: &M,
    config: &SharedConfig,
) -> Result<Vec<u8>, WireError> {
    let body = bincode::serialize(message).map_err(WireError::BodyParseFailed)?;
    if body.len() > config.max_message_size {
        return Err(WireError::SizeExceedsFrame {
            offset: 0,
            size: body.len(),
            frame: config.max_message_size,
        });
    }

    let mut record = Vec::with_capacity(MESSAGE_HEADER_SIZE + body.len());
    record.push(M::TYPE as u8);
    record.extend_from_slice(&(body.len() as u16).to_be_bytes());
    record.extend_from_slice(&body);
    Ok(record)
}

/// Deserializes a message body previously framed by [`encode_message`].
pub fn decode_message<M: Message>(body: &[u8]) -> Result<M, WireError> {
    bincode::deserialize(body).map_err(WireError::BodyParseFailed)
}

/// Prefixes a framed record with the client header's iteration echo.
pub fn encode_client_frame(iteration: u8, record: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(CLIENT_HEADER_SIZE + record.len());
    frame.push(iteration);
    frame.extend_from_slice(record);
    frame
}

/// Compresses a batch payload if it's large enough to be worth it.
///
/// Returns the payload to put on the wire and whether the compression flag
/// should be set. Payloads under the threshold, and payloads that zstd
/// fails to shrink, go out as-is.
pub fn compress_batch(payload: Vec<u8>, config: &SharedConfig) -> (Vec<u8>, bool) {
    if payload.len() <= config.batch_compression_threshold {
        return (payload, false);
    }

    match zstd::bulk::compress(&payload, 0) {
        Ok(compressed) if compressed.len() < payload.len() => (compressed, true),
        _ => (payload, false),
    }
}

/// Decompresses a batch payload in one shot, bounded by the configured
/// maximum batch size.
pub fn decompress_batch(payload: &[u8], config: &SharedConfig) -> Result<Vec<u8>, WireError> {
    zstd::bulk::decompress(payload, config.max_batch_size)
        .map_err(WireError::DecompressionFailed)
}

/// Walks every message record in a batch payload, handing each to `handler`.
///
/// Consumes exactly `payload.len()` bytes; a record that would read past the
/// end of the payload (or trailing bytes too short to hold a record header)
/// is a framing error, never a silent truncation.
pub fn for_each_message<F>(payload: &[u8], mut handler: F) -> Result<(), WireError>
where
    F: FnMut(MessageType, &[u8]) -> Result<(), WireError>,
{
    let mut offset = 0;
    while offset < payload.len() {
        if payload.len() - offset < MESSAGE_HEADER_SIZE {
            return Err(WireError::SizeExceedsFrame {
                offset,
                size: MESSAGE_HEADER_SIZE,
                frame: payload.len(),
            });
        }

        let type_tag = payload[offset];
        let message_type =
            MessageType::from_u8(type_tag).ok_or(WireError::BadMessageType(type_tag))?;
        let size = u16::from_be_bytes([payload[offset + 1], payload[offset + 2]]) as usize;

        let body_start = offset + MESSAGE_HEADER_SIZE;
        if body_start + size > payload.len() {
            return Err(WireError::SizeExceedsFrame {
                offset,
                size,
                frame: payload.len(),
            });
        }

        handler(message_type, &payload[body_start..body_start + size])?;
        offset = body_start + size;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::{ExplicitConfirmation, Heartbeat, MovementUpdate};

    fn config() -> SharedConfig {
        SharedConfig::default()
    }

    #[test]
    fn server_header_round_trip() {
        let header = ServerHeader {
            adjustment: -2,
            iteration: 3,
            payload_len: 3000,
            compressed: true,
        };

        let bytes = header.encode();
        let decoded = ServerHeader::decode(&bytes, &config()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_rejects_oversized_payload() {
        let mut bytes = ServerHeader {
            adjustment: 0,
            iteration: 0,
            payload_len: 0,
            compressed: false,
        }
        .encode();
        // Largest representable size, well past max_batch_size.
        bytes[2] = 0x7F;
        bytes[3] = 0xFF;

        assert!(matches!(
            ServerHeader::decode(&bytes, &config()),
            Err(WireError::BadHeader)
        ));
    }

    #[test]
    fn batch_round_trip() {
        let config = config();
        let mut payload = Vec::new();
        payload.extend(encode_message(&Heartbeat { tick: 42 }, &config).unwrap());
        let confirmation = ExplicitConfirmation {
            confirmed_tick_count: 1,
        };
        payload.extend(encode_message(&confirmation, &config).unwrap());
        payload.extend(encode_message(&MovementUpdate::new(42), &config).unwrap());

        let mut seen = Vec::new();
        for_each_message(&payload, |message_type, body| {
            seen.push((message_type, body.len()));
            Ok(())
        })
        .unwrap();

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, MessageType::Heartbeat);
        assert_eq!(seen[1].0, MessageType::ExplicitConfirmation);
        assert_eq!(seen[2].0, MessageType::MovementUpdate);
    }

    #[test]
    fn compressed_batch_round_trip() {
        let config = config();

        // A large, highly repetitive payload: compresses well past the
        // threshold so the flag gets set.
        let mut update = MovementUpdate::new(100);
        for i in 0..80 {
            update.entities.push(crate::net::messages::EntityState {
                entity: i,
                position: glam::Vec3::ZERO,
                velocity: glam::Vec3::ZERO,
                inputs: Default::default(),
                bounds: None,
            });
        }
        let payload = encode_message(&update, &config).unwrap();
        assert!(payload.len() > config.batch_compression_threshold);

        let uncompressed_len = payload.len();
        let (wire_payload, compressed) = compress_batch(payload, &config);
        assert!(compressed);
        assert!(wire_payload.len() < uncompressed_len);

        let restored = decompress_batch(&wire_payload, &config).unwrap();
        assert_eq!(restored.len(), uncompressed_len);

        let mut decoded = None;
        for_each_message(&restored, |message_type, body| {
            assert_eq!(message_type, MessageType::MovementUpdate);
            decoded = Some(decode_message::<MovementUpdate>(body)?);
            Ok(())
        })
        .unwrap();
        assert_eq!(decoded.unwrap(), update);
    }

    #[test]
    fn small_batch_stays_uncompressed() {
        let config = config();
        let payload = encode_message(&Heartbeat { tick: 1 }, &config).unwrap();
        let (wire_payload, compressed) = compress_batch(payload.clone(), &config);

        assert!(!compressed);
        assert_eq!(wire_payload, payload);
    }

    #[test]
    fn bad_type_tag_is_an_error() {
        let config = config();
        let mut payload = encode_message(&Heartbeat { tick: 1 }, &config).unwrap();
        payload[0] = 0xEE;

        let result = for_each_message(&payload, |_, _| Ok(()));
        assert!(matches!(result, Err(WireError::BadMessageType(0xEE))));
    }

    #[test]
    fn record_overrunning_frame_is_an_error() {
        let config = config();
        let mut payload = encode_message(&Heartbeat { tick: 1 }, &config).unwrap();
        // Inflate the advertised body size past the end of the payload.
        payload[1] = 0xFF;
        payload[2] = 0xFF;

        let result = for_each_message(&payload, |_, _| Ok(()));
        assert!(matches!(result, Err(WireError::SizeExceedsFrame { .. })));
    }

    #[test]
    fn trailing_residue_is_an_error() {
        let config = config();
        let mut payload = encode_message(&Heartbeat { tick: 1 }, &config).unwrap();
        // Residual bytes too short to be another record.
        payload.extend_from_slice(&[0, 0]);

        let result = for_each_message(&payload, |_, _| Ok(()));
        assert!(matches!(result, Err(WireError::SizeExceedsFrame { .. })));
    }

    #[test]
    fn corrupt_compressed_payload_is_an_error() {
        let config = config();
        let garbage = vec![0x5A; 64];
        assert!(matches!(
            decompress_batch(&garbage, &config),
            Err(WireError::DecompressionFailed(_))
        ));
    }

    #[test]
    fn single_byte_mutation_never_silently_corrupts_framing() {
        // Flipping any single byte of a framed heartbeat either still parses
        // as some heartbeat or fails with a framing error; the walk never
        // reads outside the frame.
        let config = config();
        let payload = encode_message(&Heartbeat { tick: 0x01020304 }, &config).unwrap();

        for index in 0..payload.len() {
            let mut mutated = payload.clone();
            mutated[index] ^= 0x01;

            let _ = for_each_message(&mutated, |message_type, body| {
                if message_type == MessageType::Heartbeat {
                    let _ = decode_message::<Heartbeat>(body)?;
                }
                Ok(())
            });
        }
    }
}
