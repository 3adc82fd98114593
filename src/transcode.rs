//! Base64 transcoding of opaque binary entries

use std::io::{Read, Write};

use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

// Binary data constants
const BINARY_NEWLINE: u8 = b'\n';
const BINARY_CARRIAGE_RETURN: u8 = b'\r';

/// Encodes binary entries to a single base64 line and back.
///
/// With `compress` on, bytes are gzipped (best compression, zero mtime so
/// output is stable) before encoding and gunzipped after decoding. Both
/// directions of a conversion pair must agree on the flag, which is why the
/// document records it in its options.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transcoder {
    compress: bool,
}

impl Transcoder {
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    pub fn encode(&self, data: &[u8]) -> Result<String> {
        if !self.compress {
            return Ok(base64::engine::general_purpose::STANDARD.encode(data));
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map(|gz| base64::engine::general_purpose::STANDARD.encode(gz))
            .map_err(|e| Error::io("gzip binary entry", e))
    }

    pub fn decode(&self, text: &str) -> Result<Vec<u8>> {
        let filtered = Self::filter_base64_data(text.as_bytes());
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&filtered)
            .map_err(|e| Error::MalformedDocument(format!("invalid base64: {}", e)))?;

        if !self.compress {
            return Ok(decoded);
        }

        let mut out = Vec::new();
        GzDecoder::new(decoded.as_slice())
            .read_to_end(&mut out)
            .map_err(|e| Error::MalformedDocument(format!("invalid gzip payload: {}", e)))?;
        Ok(out)
    }

    /// Filter base64 data by removing newlines, carriage returns and
    /// indentation left over from the block layout
    fn filter_base64_data(data: &[u8]) -> Vec<u8> {
        data.iter()
            .copied()
            .filter(|&c| c != BINARY_NEWLINE && c != BINARY_CARRIAGE_RETURN && c != b' ')
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_plain() {
        let transcoder = Transcoder::new(false);
        let data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0xFF];
        let text = transcoder.encode(&data).unwrap();
        assert!(!text.contains('\n'));
        assert_eq!(transcoder.decode(&text).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_compressed() {
        let transcoder = Transcoder::new(true);
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let text = transcoder.encode(&data).unwrap();
        assert!(text.len() < data.len());
        assert_eq!(transcoder.decode(&text).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_empty() {
        for compress in [false, true] {
            let transcoder = Transcoder::new(compress);
            let text = transcoder.encode(&[]).unwrap();
            assert_eq!(transcoder.decode(&text).unwrap(), Vec::<u8>::new());
        }
        assert_eq!(Transcoder::new(false).encode(&[]).unwrap(), "");
    }

    #[test]
    fn test_compressed_output_is_stable() {
        let transcoder = Transcoder::new(true);
        let data = b"same bytes, same text".to_vec();
        assert_eq!(transcoder.encode(&data).unwrap(), transcoder.encode(&data).unwrap());
    }

    #[test]
    fn test_decode_tolerates_wrapped_lines() {
        let transcoder = Transcoder::new(false);
        assert_eq!(transcoder.decode("  /9j/\r\n").unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Transcoder::new(false).decode("not*base64").unwrap_err();
        assert!(err.to_string().contains("invalid base64"));

        // Plain base64 read with compression on is not a gzip stream
        let text = Transcoder::new(false).encode(b"plain").unwrap();
        let err = Transcoder::new(true).decode(&text).unwrap_err();
        assert!(err.to_string().contains("invalid gzip"));
    }
}
