// File codecs for the two Sierra on-disk formats
// scid: 56-byte header + 40-byte trade records
// depth: 64-byte header + 24-byte depth records grouped into batches

pub mod depth;
pub mod scid;

pub use depth::{DepthHeader, DepthReader, DepthWriter};
pub use scid::{ScidHeader, ScidReader, ScidWriter};

use thiserror::Error;

/// Structural decode/encode failures. All are fatal except `TruncatedStream`
/// encountered in a record body, which downgrades the run to
/// partially-complete once at least one record has decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bad magic {found:#010x} (expected {expected:#010x})")]
    BadMagic { expected: u32, found: u32 },
    #[error("unexpected header size {found} (expected {expected})")]
    BadHeaderSize { expected: u32, found: u32 },
    #[error("unexpected record size {found} (expected {expected})")]
    BadRecordSize { expected: u32, found: u32 },
    #[error("stream truncated: {0}")]
    TruncatedStream(String),
    #[error("malformed batch at {dt_us}us: {reason}")]
    MalformedBatch { dt_us: u64, reason: String },
    #[error("depth record at {dt_us}us falls outside the run day window")]
    RecordOutsideDay { dt_us: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub fn is_truncation(&self) -> bool {
        matches!(self, CodecError::TruncatedStream(_))
    }
}

/// Read as many bytes as the source yields, up to `buf.len()`. Unlike
/// `read_exact` this reports how far a truncated tail got.
pub(crate) fn read_full<R: std::io::Read>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
