//! Findings archive segments.
//!
//! One segment holds the entire findings history plus its interner as a
//! single compressed frame. Written on shutdown and after retention runs,
//! read back at daemon startup.
//!
//! File layout:
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ HEADER (20 bytes, uncompressed)              │
//! │   magic: [u8; 4]      = b"LKW1"              │
//! │   version: u16        = 1                    │
//! │   _reserved: u16      = 0                    │
//! │   crc32: u32          (of the frame)         │
//! │   frame_len: u64                             │
//! ├──────────────────────────────────────────────┤
//! │ FRAME                                        │
//! │   zstd(postcard(ArchivedFindings))           │
//! └──────────────────────────────────────────────┘
//! ```

use std::fs;
use std::io::{self, Read as _, Write as _};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::findings::FindingsHistory;
use crate::storage::interner::StringInterner;

const MAGIC: [u8; 4] = *b"LKW1";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 20;
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug)]
pub enum SegmentError {
    Io(io::Error),
    /// Bad magic, version, checksum or length.
    Corrupt(String),
    Encode(String),
}

impl std::fmt::Display for SegmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentError::Io(e) => write!(f, "segment I/O error: {}", e),
            SegmentError::Corrupt(msg) => write!(f, "segment corrupt: {}", msg),
            SegmentError::Encode(msg) => write!(f, "segment encode error: {}", msg),
        }
    }
}

impl std::error::Error for SegmentError {}

impl From<io::Error> for SegmentError {
    fn from(e: io::Error) -> Self {
        SegmentError::Io(e)
    }
}

#[derive(Serialize, Deserialize)]
struct ArchivedFindings {
    history: FindingsHistory,
    interner: StringInterner,
}

/// Writes the history and interner as one segment file.
///
/// The file is written via a temporary sibling and renamed so readers never
/// observe a half-written segment.
pub fn write_segment(
    path: &Path,
    history: &FindingsHistory,
    interner: &StringInterner,
) -> Result<(), SegmentError> {
    let archived = ArchivedFindings {
        history: history.clone(),
        interner: interner.clone(),
    };
    let raw = postcard::to_allocvec(&archived).map_err(|e| SegmentError::Encode(e.to_string()))?;
    let frame = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)?;
    let crc = crc32fast::hash(&frame);

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(&MAGIC);
    header.extend_from_slice(&VERSION.to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes());
    header.extend_from_slice(&crc.to_le_bytes());
    header.extend_from_slice(&(frame.len() as u64).to_le_bytes());

    let tmp = path.with_extension("seg.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&header)?;
        file.write_all(&frame)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a segment back into a history and interner.
pub fn read_segment(path: &Path) -> Result<(FindingsHistory, StringInterner), SegmentError> {
    let mut file = fs::File::open(path)?;

    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)?;

    if header[0..4] != MAGIC {
        return Err(SegmentError::Corrupt(format!(
            "invalid magic: expected LKW1, got {:?}",
            &header[0..4]
        )));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(SegmentError::Corrupt(format!(
            "unsupported version: {}",
            version
        )));
    }
    let crc = u32::from_le_bytes(header[8..12].try_into().expect("fixed header slice"));
    let frame_len = u64::from_le_bytes(header[12..20].try_into().expect("fixed header slice"));

    let mut frame = Vec::new();
    file.read_to_end(&mut frame)?;
    if frame.len() as u64 != frame_len {
        return Err(SegmentError::Corrupt(format!(
            "frame length mismatch: header says {}, file has {}",
            frame_len,
            frame.len()
        )));
    }
    if crc32fast::hash(&frame) != crc {
        return Err(SegmentError::Corrupt("checksum mismatch".to_string()));
    }

    let raw = zstd::decode_all(frame.as_slice())?;
    let archived: ArchivedFindings =
        postcard::from_bytes(&raw).map_err(|e| SegmentError::Corrupt(e.to_string()))?;
    Ok((archived.history, archived.interner))
}
