//! MS-OVBA plumbing: the compressed container (2.4.1) and the subset of the
//! `VBA/dir` stream (2.3.4.2) needed to locate module source.

use encoding_rs::{
    Encoding, BIG5, EUC_KR, GBK, SHIFT_JIS, UTF_8, WINDOWS_1250, WINDOWS_1251, WINDOWS_1252,
    WINDOWS_1253, WINDOWS_1254, WINDOWS_1255, WINDOWS_1256, WINDOWS_1257, WINDOWS_1258,
    WINDOWS_874,
};
use thiserror::Error;

const CHUNK_SIZE: usize = 4096;
const CONTAINER_SIGNATURE: u8 = 0x01;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("compressed container is empty")]
    Empty,
    #[error("invalid compressed container signature {0:#04x}")]
    InvalidSignature(u8),
    #[error("truncated compressed chunk header")]
    TruncatedChunkHeader,
    #[error("invalid compressed chunk signature bits {0:#x}")]
    InvalidChunkSignature(u16),
    #[error("truncated compressed chunk data")]
    TruncatedChunkData,
    #[error("truncated copy token")]
    TruncatedCopyToken,
    #[error("copy token references data before start of chunk (offset={offset}, out_len={out_len})")]
    BadCopyOffset { offset: usize, out_len: usize },
}

/// Decompress a `CompressedContainer`.
pub fn decompress_container(input: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let (&sig, rest) = input.split_first().ok_or(CompressionError::Empty)?;
    if sig != CONTAINER_SIGNATURE {
        return Err(CompressionError::InvalidSignature(sig));
    }

    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < rest.len() {
        if offset + 2 > rest.len() {
            return Err(CompressionError::TruncatedChunkHeader);
        }

        let header = u16::from_le_bytes([rest[offset], rest[offset + 1]]);
        offset += 2;

        // bits 12..14 must be 0b011
        let signature_bits = (header & 0x7000) >> 12;
        if signature_bits != 0b011 {
            return Err(CompressionError::InvalidChunkSignature(signature_bits));
        }

        let compressed = (header & 0x8000) != 0;
        // chunk size includes the two header bytes
        let chunk_data_size = (header & 0x0FFF) as usize + 1;
        if offset + chunk_data_size > rest.len() {
            return Err(CompressionError::TruncatedChunkData);
        }
        let chunk = &rest[offset..offset + chunk_data_size];
        offset += chunk_data_size;

        if compressed {
            decompress_chunk(chunk, &mut out)?;
        } else {
            out.extend_from_slice(chunk);
        }
    }

    Ok(out)
}

fn decompress_chunk(chunk: &[u8], out: &mut Vec<u8>) -> Result<(), CompressionError> {
    let chunk_start = out.len();
    let mut idx = 0usize;

    while idx < chunk.len() {
        let flags = chunk[idx];
        idx += 1;
        for bit in 0..8 {
            if idx >= chunk.len() || out.len() - chunk_start >= CHUNK_SIZE {
                break;
            }

            if flags & (1 << bit) == 0 {
                out.push(chunk[idx]);
                idx += 1;
                continue;
            }

            if idx + 2 > chunk.len() {
                return Err(CompressionError::TruncatedCopyToken);
            }
            let token = u16::from_le_bytes([chunk[idx], chunk[idx + 1]]);
            idx += 2;

            let decompressed = out.len() - chunk_start;
            let bit_count = copy_token_bit_count(decompressed);
            let length_bit_count = 16 - bit_count;
            let length_mask: u16 = (1u16 << length_bit_count) - 1;

            let offset = (token >> length_bit_count) as usize + 1;
            let length = (token & length_mask) as usize + 3;

            if offset > decompressed {
                return Err(CompressionError::BadCopyOffset {
                    offset,
                    out_len: decompressed,
                });
            }

            for _ in 0..length {
                if out.len() - chunk_start >= CHUNK_SIZE {
                    break;
                }
                let byte = out[out.len() - offset];
                out.push(byte);
            }
        }
    }

    Ok(())
}

/// CopyTokenBitCount, derived from the bytes decompressed so far in the chunk.
fn copy_token_bit_count(decompressed: usize) -> u32 {
    let n = decompressed.saturating_sub(1);
    let bits_needed = if n == 0 {
        0
    } else {
        usize::BITS - n.leading_zeros()
    };
    bits_needed.clamp(4, 12)
}

/// Produce a `CompressedContainer` without back-references.
///
/// Full 4096-byte pieces are stored as raw chunks; the tail is written as
/// literal tokens when they fit a chunk, otherwise raw. Used to assemble VBA
/// projects, e.g. in fixtures.
pub fn compress_container(data: &[u8]) -> Vec<u8> {
    let mut out = vec![CONTAINER_SIGNATURE];
    for piece in data.chunks(CHUNK_SIZE) {
        let literal_len = piece.len() + piece.len().div_ceil(8);
        if piece.len() == CHUNK_SIZE || literal_len > CHUNK_SIZE {
            // size field holds (chunk size incl. header) - 3
            let header = 0x3000u16 | (piece.len() + 2 - 3) as u16;
            out.extend_from_slice(&header.to_le_bytes());
            out.extend_from_slice(piece);
            continue;
        }

        let mut chunk = Vec::with_capacity(literal_len);
        for group in piece.chunks(8) {
            chunk.push(0x00);
            chunk.extend_from_slice(group);
        }
        let header = 0xB000u16 | (chunk.len() + 2 - 3) as u16;
        out.extend_from_slice(&header.to_le_bytes());
        out.extend_from_slice(&chunk);
    }
    out
}

/// How a module's source is exposed to the VBA editor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModuleKind {
    /// Standard module, exported as `.bas`
    Procedural,
    /// Document, class or designer module, exported as `.cls`
    NonProcedural,
}

impl ModuleKind {
    pub fn file_extension(self) -> &'static str {
        match self {
            ModuleKind::Procedural => "bas",
            ModuleKind::NonProcedural => "cls",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub name: String,
    pub stream_name: String,
    pub kind: ModuleKind,
    pub text_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirStream {
    pub project_name: Option<String>,
    pub codepage: Option<u16>,
    pub modules: Vec<ModuleRecord>,
}

#[derive(Debug, Error)]
pub enum DirParseError {
    #[error("dir stream is truncated")]
    Truncated,
    #[error("dir record claims a length beyond the remaining bytes (id={id:#06x}, len={len})")]
    BadRecordLength { id: u16, len: usize },
}

// dir stream record ids
const PROJECTCODEPAGE: u16 = 0x0003;
const PROJECTNAME: u16 = 0x0004;
const PROJECTVERSION: u16 = 0x0009;
const MODULENAME: u16 = 0x0019;
const MODULESTREAMNAME: u16 = 0x001A;
const MODULETYPE_PROCEDURAL: u16 = 0x0021;
const MODULETYPE_NONPROCEDURAL: u16 = 0x0022;
const MODULETEXTOFFSET: u16 = 0x0031;

impl DirStream {
    /// Parse a decompressed `VBA/dir` stream.
    ///
    /// Records are read as `Id (u16) | Size (u32) | Size bytes`. The Unicode
    /// tails of name records (reserved id, size, bytes) share that layout
    /// and are skipped as records of their own. `PROJECTVERSION` is the one
    /// fixed-size record whose `Size` field does not cover its payload.
    pub fn parse(decompressed: &[u8]) -> Result<Self, DirParseError> {
        let mut offset = 0usize;
        let mut project_name_bytes = None;
        let mut codepage = None;
        let mut raw_modules: Vec<(Vec<u8>, Vec<u8>, ModuleKind, usize)> = Vec::new();

        while offset < decompressed.len() {
            if offset + 6 > decompressed.len() {
                return Err(DirParseError::Truncated);
            }
            let id = u16::from_le_bytes([decompressed[offset], decompressed[offset + 1]]);

            if id == PROJECTVERSION {
                // Id, Reserved (u32), VersionMajor (u32), VersionMinor (u16)
                offset += 12;
                if offset > decompressed.len() {
                    return Err(DirParseError::Truncated);
                }
                continue;
            }

            let len = u32::from_le_bytes([
                decompressed[offset + 2],
                decompressed[offset + 3],
                decompressed[offset + 4],
                decompressed[offset + 5],
            ]) as usize;
            offset += 6;
            if len > decompressed.len() - offset {
                return Err(DirParseError::BadRecordLength { id, len });
            }
            let data = &decompressed[offset..offset + len];
            offset += len;

            match id {
                PROJECTCODEPAGE if data.len() >= 2 => {
                    codepage = Some(u16::from_le_bytes([data[0], data[1]]));
                }
                PROJECTNAME => project_name_bytes = Some(data.to_vec()),
                MODULENAME => {
                    raw_modules.push((data.to_vec(), Vec::new(), ModuleKind::Procedural, 0));
                }
                MODULESTREAMNAME => {
                    if let Some(m) = raw_modules.last_mut() {
                        m.1 = data.to_vec();
                    }
                }
                MODULETYPE_PROCEDURAL => {
                    if let Some(m) = raw_modules.last_mut() {
                        m.2 = ModuleKind::Procedural;
                    }
                }
                MODULETYPE_NONPROCEDURAL => {
                    if let Some(m) = raw_modules.last_mut() {
                        m.2 = ModuleKind::NonProcedural;
                    }
                }
                MODULETEXTOFFSET if data.len() >= 4 => {
                    if let Some(m) = raw_modules.last_mut() {
                        m.3 = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
                    }
                }
                _ => {}
            }
        }

        let encoding = encoding_for_codepage(codepage);
        let modules = raw_modules
            .into_iter()
            .map(|(name, stream_name, kind, text_offset)| {
                let name = decode(&name, encoding);
                let stream_name = if stream_name.is_empty() {
                    name.clone()
                } else {
                    decode(&stream_name, encoding)
                };
                ModuleRecord {
                    name,
                    stream_name,
                    kind,
                    text_offset,
                }
            })
            .collect();

        Ok(Self {
            project_name: project_name_bytes.map(|b| decode(&b, encoding)),
            codepage,
            modules,
        })
    }

    pub fn encoding(&self) -> &'static Encoding {
        encoding_for_codepage(self.codepage)
    }
}

pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (cow, _, _) = encoding.decode(bytes);
    cow.into_owned()
}

fn encoding_for_codepage(codepage: Option<u16>) -> &'static Encoding {
    match codepage {
        Some(874) => WINDOWS_874,
        Some(932) => SHIFT_JIS,
        Some(936) => GBK,
        Some(949) => EUC_KR,
        Some(950) => BIG5,
        Some(1250) => WINDOWS_1250,
        Some(1251) => WINDOWS_1251,
        Some(1253) => WINDOWS_1253,
        Some(1254) => WINDOWS_1254,
        Some(1255) => WINDOWS_1255,
        Some(1256) => WINDOWS_1256,
        Some(1257) => WINDOWS_1257,
        Some(1258) => WINDOWS_1258,
        Some(65001) => UTF_8,
        _ => WINDOWS_1252,
    }
}
