//! permessage-deflate (RFC 7692), without context takeover.
//!
//! Every message is compressed with a fresh DEFLATE stream and both sides are
//! asked not to carry the sliding window across messages, so a message can
//! always be inflated on its own.

use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::Write;

use crate::error::{Error, Result};

/// Extension name as it appears in `Sec-WebSocket-Extensions`.
pub const EXTENSION_NAME: &str = "permessage-deflate";

/// Parameters sent in both the client offer and the server answer.
pub const NEGOTIATED: &str =
    "permessage-deflate; client_no_context_takeover; server_no_context_takeover";

const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Output reserved per inflate step.
const INFLATE_CHUNK: usize = 16 * 1024;

/// Returns `true` if any extension entry names permessage-deflate.
#[must_use]
pub fn is_offered(extensions: &[String]) -> bool {
    extensions.iter().any(|ext| {
        ext.split(';')
            .next()
            .is_some_and(|name| name.trim().eq_ignore_ascii_case(EXTENSION_NAME))
    })
}

/// Compress one message payload.
///
/// The stream is sync-flushed and the trailing `00 00 ff ff` removed, as
/// RFC 7692 Section 7.2.1 requires.
///
/// # Errors
///
/// Returns [`Error::Extension`] if the encoder fails.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(data.len() / 2 + 8),
        Compression::default(),
    );
    encoder
        .write_all(data)
        .and_then(|()| encoder.flush())
        .map_err(|e| Error::Extension(format!("compression failed: {e}")))?;

    let mut compressed = std::mem::take(encoder.get_mut());
    if compressed.ends_with(&DEFLATE_TRAILER) {
        compressed.truncate(compressed.len() - DEFLATE_TRAILER.len());
    }
    Ok(compressed)
}

/// Inflate one message payload.
///
/// The sender stripped the sync-flush trailer, so it is appended again and
/// the stream is inflated with a sync flush; it never carries a final block.
/// With `limit` set, inflation stops as soon as the output grows past it.
///
/// # Errors
///
/// - [`Error::MessageTooBig`] if the output exceeds `limit`
/// - [`Error::Extension`] if the payload is not a valid DEFLATE stream
pub fn decompress(data: &[u8], limit: Option<usize>) -> Result<Vec<u8>> {
    let mut input = Vec::with_capacity(data.len() + DEFLATE_TRAILER.len());
    input.extend_from_slice(data);
    input.extend_from_slice(&DEFLATE_TRAILER);

    let cap = limit.map_or(usize::MAX, |max| max.saturating_add(1));
    let mut inflater = Decompress::new(false);
    let mut out = Vec::new();
    loop {
        let consumed = usize::try_from(inflater.total_in()).unwrap_or(usize::MAX);
        let produced = out.len();
        out.reserve_exact((cap - produced).min(INFLATE_CHUNK));

        let status = inflater
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
            .map_err(|e| Error::Extension(format!("decompression failed: {e}")))?;

        if let Some(max) = limit {
            if out.len() > max {
                return Err(Error::MessageTooBig {
                    size: out.len(),
                    max,
                });
            }
        }

        let input_done = usize::try_from(inflater.total_in()).unwrap_or(usize::MAX) >= input.len();
        let output_full = out.len() == out.capacity();
        if status == Status::StreamEnd || (input_done && !output_full) {
            return Ok(out);
        }
        let progressed = usize::try_from(inflater.total_in()).unwrap_or(usize::MAX) > consumed
            || out.len() > produced;
        if !progressed {
            return Err(Error::Extension("decompression failed: truncated stream".into()));
        }
    }
}
