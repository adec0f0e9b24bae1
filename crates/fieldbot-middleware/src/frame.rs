//! Delimiter-free JSON framing.
//!
//! The operator app writes bare JSON objects back to back, and the radio
//! link may split or merge them arbitrarily.  [`JsonFrameDecoder`] buffers
//! bytes and yields every complete top-level value, keeping an incomplete
//! tail for the next chunk.

use fieldbot_types::FieldError;
use serde_json::Value;

/// Default cap on a single buffered frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Incremental JSON value splitter.
///
/// ```
/// use fieldbot_middleware::JsonFrameDecoder;
///
/// let mut dec = JsonFrameDecoder::default();
/// assert!(dec.push(br#"{"command":"forw"#).is_empty());
/// let frames = dec.push(br#"ard","state":"pressed"}{"a":1}"#);
/// assert_eq!(frames.len(), 2);
/// ```
#[derive(Debug)]
pub struct JsonFrameDecoder {
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl Default for JsonFrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl JsonFrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Bytes held back waiting for the rest of a value.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed a chunk and return every value it completes, in order.
    ///
    /// Invalid JSON yields one [`FieldError::MalformedInput`] and discards
    /// the buffer, so a corrupt chunk cannot wedge the stream.  So does a
    /// partial value growing past the size cap.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Value, FieldError>> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let consumed = {
            let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            loop {
                match stream.next() {
                    Some(Ok(value)) => frames.push(Ok(value)),
                    Some(Err(e)) if e.is_eof() => break stream.byte_offset(),
                    Some(Err(e)) => {
                        frames.push(Err(FieldError::MalformedInput(format!("invalid JSON frame: {e}"))));
                        break self.buf.len();
                    }
                    None => break self.buf.len(),
                }
            }
        };
        self.buf.drain(..consumed);

        if self.buf.len() > self.max_frame_bytes {
            frames.push(Err(FieldError::MalformedInput(format!(
                "frame exceeds {} bytes",
                self.max_frame_bytes
            ))));
            self.buf.clear();
        }
        frames
    }
}
