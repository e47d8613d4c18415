//! Content-encoding transcoding for request and response bodies.
//!
//! Used in two places: decoding compressed request bodies so body rules can
//! inspect them, and re-encoding canned or relayed response bodies to match
//! what the client advertises in `Accept-Encoding`.

use flate2::read::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::{self, Read};

/// The encoding methods the engine can transcode. Anything else passes
/// bodies through unchanged.
pub const GZIP: &str = "gzip";
pub const DEFLATE: &str = "deflate";

/// Stateless gzip/deflate helper bound to one encoding method.
///
/// Method comparison is case-insensitive; an unrecognized method behaves as
/// the identity transform in both directions.
#[derive(Debug, Clone)]
pub struct ContentEncoder {
    method: String,
}

impl ContentEncoder {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Whether this method produces output different from its input.
    pub fn is_transforming(&self) -> bool {
        let m = self.method.to_ascii_lowercase();
        m == GZIP || m == DEFLATE
    }

    /// Compress `body` with this encoding. `None` passes through as `None`.
    pub fn encode(&self, body: Option<&[u8]>) -> io::Result<Option<Vec<u8>>> {
        let Some(body) = body else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(body.len());
        match self.method.to_ascii_lowercase().as_str() {
            GZIP => {
                GzEncoder::new(body, Compression::default()).read_to_end(&mut out)?;
            }
            DEFLATE => {
                DeflateEncoder::new(body, Compression::default()).read_to_end(&mut out)?;
            }
            _ => out.extend_from_slice(body),
        }
        Ok(Some(out))
    }

    /// Decompress `body` with this encoding. `None` passes through as `None`.
    pub fn decode(&self, body: Option<&[u8]>) -> io::Result<Option<Vec<u8>>> {
        let Some(body) = body else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(body.len());
        match self.method.to_ascii_lowercase().as_str() {
            GZIP => {
                GzDecoder::new(body).read_to_end(&mut out)?;
            }
            DEFLATE => {
                DeflateDecoder::new(body).read_to_end(&mut out)?;
            }
            _ => out.extend_from_slice(body),
        }
        Ok(Some(out))
    }
}
