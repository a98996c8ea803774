//! Length-prefixed JSON frame decoder.
//!
//! Wire format: `<decimal-ASCII length>\n<payload of that many bytes>`,
//! repeated. Restartable — no state survives a [`FrameDecoder::reset`], and
//! a decode failure is fatal to the current connection (the caller is
//! expected to tear down and reconnect, not keep feeding this decoder).

use crate::error::DecodeError;
use serde_json::Value;

const MAX_PREFIX_LEN: usize = 12;

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    expected_size: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected_size = None;
    }

    /// Appends newly-arrived bytes to the internal buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pulls as many complete frames as are currently available, decoding
    /// each as a JSON object. Returns as soon as no further frame can be
    /// fully assembled from buffered bytes.
    pub fn drain(&mut self) -> Result<Vec<Value>, DecodeError> {
        let mut out = Vec::new();
        loop {
            match self.try_take_one()? {
                Some(v) => out.push(v),
                None => return Ok(out),
            }
        }
    }

    fn try_take_one(&mut self) -> Result<Option<Value>, DecodeError> {
        if self.expected_size.is_none() {
            let Some(nl) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > MAX_PREFIX_LEN {
                    return Err(DecodeError::BadLengthPrefix(format!(
                        "no newline within {MAX_PREFIX_LEN} bytes"
                    )));
                }
                return Ok(None);
            };

            let prefix = std::str::from_utf8(&self.buf[..nl])
                .map_err(|e| DecodeError::BadLengthPrefix(e.to_string()))?;
            let size: usize = prefix
                .parse()
                .map_err(|_| DecodeError::BadLengthPrefix(prefix.to_owned()))?;

            self.buf.drain(..=nl);
            self.expected_size = Some(size);
        }

        let size = self.expected_size.expect("checked above");
        if self.buf.len() < size {
            return Ok(None);
        }

        let payload: Vec<u8> = self.buf.drain(..size).collect();
        self.expected_size = None;

        let value: Value =
            serde_json::from_slice(&payload).map_err(|e| DecodeError::Json(e.to_string()))?;
        Ok(Some(value))
    }
}
