//! Protocol codec for encoding/decoding frames
//!
//! Handles the length-prefixed framing of RCON packets and the receive
//! buffer that accumulates partial reads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{
    Frame, PacketType, DEFAULT_MAX_FRAME_SIZE, FRAME_OVERHEAD, HEADER_SIZE, MIN_FRAME_SIZE,
    SIZE_FIELD_LEN, TERMINATOR_LEN,
};

/// Codec errors. Any of these leaves the byte stream unsynchronized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Declared frame size {0} is below the minimum of 10")]
    SizeTooSmall(i32),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),
}

/// Encode a frame onto the end of `buf`
pub fn encode(id: i32, kind: PacketType, body: &[u8], buf: &mut BytesMut) {
    let size = (MIN_FRAME_SIZE + body.len()) as i32;

    buf.reserve(FRAME_OVERHEAD + body.len());
    buf.put_i32_le(size);
    buf.put_i32_le(id);
    buf.put_i32_le(kind.as_i32());
    buf.put_slice(body);
    buf.put_bytes(0, TERMINATOR_LEN);
}

/// Encode a frame into a freshly allocated buffer
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    encode(frame.id, frame.kind, &frame.body, &mut buf);
    buf.freeze()
}

/// Check whether `buf` starts with a complete frame.
///
/// Returns the total number of bytes the frame occupies, or `None` if more
/// data is needed. Nothing is consumed.
pub fn complete_frame_len(buf: &[u8], max_frame_size: usize) -> Result<Option<usize>, CodecError> {
    if buf.len() < SIZE_FIELD_LEN {
        return Ok(None);
    }

    let size = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if size < MIN_FRAME_SIZE as i32 {
        return Err(CodecError::SizeTooSmall(size));
    }

    let size = size as usize;
    if size > max_frame_size {
        return Err(CodecError::FrameTooLarge(size, max_frame_size));
    }

    let total = SIZE_FIELD_LEN + size;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(total))
}

/// Decode one frame from the front of `buf`.
///
/// On success returns the frame and the number of bytes to drop from the
/// front of the buffer. Returns `Ok(None)` if the buffer does not yet hold a
/// complete frame.
pub fn try_decode_one(buf: &[u8], max_frame_size: usize) -> Result<Option<(Frame, usize)>, CodecError> {
    let Some(total) = complete_frame_len(buf, max_frame_size)? else {
        return Ok(None);
    };

    let (id, kind) = read_header(buf);
    let body = Bytes::copy_from_slice(&buf[HEADER_SIZE..total - TERMINATOR_LEN]);
    Ok(Some((Frame { id, kind, body }, total)))
}

fn read_header(buf: &[u8]) -> (i32, PacketType) {
    let id = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let kind = i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    (id, PacketType(kind))
}

/// Receive buffer holding bytes not yet resolved into frames
pub struct FrameBuffer {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Append raw bytes read from the socket
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Split the next complete frame off the front of the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        let Some(total) = complete_frame_len(&self.buffer, self.max_frame_size)? else {
            return Ok(None);
        };

        let (id, kind) = read_header(&self.buffer);
        let mut raw = self.buffer.split_to(total);
        raw.advance(HEADER_SIZE);
        raw.truncate(raw.len() - TERMINATOR_LEN);

        Ok(Some(Frame {
            id,
            kind,
            body: raw.freeze(),
        }))
    }

    /// Push data and drain every frame that became complete
    pub fn push_and_drain(&mut self, data: &[u8]) -> Result<Vec<Frame>, CodecError> {
        self.push(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Number of buffered bytes belonging to an incomplete frame
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::new(5, PacketType::EXEC_COMMAND, "status"),
            Frame::sentinel(6),
            Frame::new(5, PacketType::RESPONSE_VALUE, "hostname: foo\n"),
            Frame::new(-1, PacketType::AUTH_RESPONSE, ""),
        ]
    }

    #[test]
    fn test_wire_layout() {
        let bytes = encode_frame(&Frame::new(7, PacketType::AUTH, "pw"));

        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &12i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3i32.to_le_bytes());
        assert_eq!(&bytes[12..14], b"pw");
        assert_eq!(&bytes[14..16], &[0, 0]);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for original in sample_frames() {
            let bytes = encode_frame(&original);
            let (decoded, consumed) = try_decode_one(&bytes, DEFAULT_MAX_FRAME_SIZE)
                .unwrap()
                .unwrap();
            assert_eq!(decoded, original);
            assert_eq!(consumed, bytes.len());
        }
    }

    #[test]
    fn test_partial_frame_needs_more_data() {
        let bytes = encode_frame(&Frame::new(1, PacketType::EXEC_COMMAND, "users"));

        assert_eq!(try_decode_one(&bytes[..3], DEFAULT_MAX_FRAME_SIZE).unwrap(), None);
        assert_eq!(
            try_decode_one(&bytes[..bytes.len() - 1], DEFAULT_MAX_FRAME_SIZE).unwrap(),
            None
        );
    }

    #[test]
    fn test_size_below_minimum_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(9);
        buf.put_slice(&[0; 9]);

        assert_eq!(
            try_decode_one(&buf, DEFAULT_MAX_FRAME_SIZE),
            Err(CodecError::SizeTooSmall(9))
        );
    }

    #[test]
    fn test_negative_size_is_rejected() {
        let buf = (-5i32).to_le_bytes();
        assert_eq!(
            try_decode_one(&buf, DEFAULT_MAX_FRAME_SIZE),
            Err(CodecError::SizeTooSmall(-5))
        );
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let bytes = encode_frame(&Frame::new(1, PacketType::RESPONSE_VALUE, vec![b'x'; 64]));
        assert_eq!(
            try_decode_one(&bytes, 32),
            Err(CodecError::FrameTooLarge(74, 32))
        );
    }

    #[test]
    fn test_byte_at_a_time_matches_single_chunk() {
        let frames = sample_frames();
        let mut stream = BytesMut::new();
        for frame in &frames {
            encode(frame.id, frame.kind, &frame.body, &mut stream);
        }

        let mut whole = FrameBuffer::new();
        let all_at_once = whole.push_and_drain(&stream).unwrap();

        let mut trickle = FrameBuffer::new();
        let mut one_by_one = Vec::new();
        for byte in stream.iter() {
            one_by_one.extend(trickle.push_and_drain(&[*byte]).unwrap());
        }

        assert_eq!(all_at_once, frames);
        assert_eq!(one_by_one, frames);
        assert!(trickle.is_empty());
    }

    #[test]
    fn test_buffer_retains_trailing_partial_frame() {
        let first = encode_frame(&Frame::new(1, PacketType::RESPONSE_VALUE, "a"));
        let second = encode_frame(&Frame::new(2, PacketType::RESPONSE_VALUE, "bb"));

        let mut buffer = FrameBuffer::new();
        let mut chunk = first.to_vec();
        chunk.extend_from_slice(&second[..5]);

        let frames = buffer.push_and_drain(&chunk).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.len(), 5);

        let frames = buffer.push_and_drain(&second[5..]).unwrap();
        assert_eq!(frames, vec![Frame::new(2, PacketType::RESPONSE_VALUE, "bb")]);
        assert!(buffer.is_empty());
    }
}
