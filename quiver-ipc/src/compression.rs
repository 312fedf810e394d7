//! The pluggable body-buffer compression service.
//!
//! Only two codecs are allow-listed for IPC bodies. Each buffer is
//! compressed independently and prefixed with its uncompressed length as a
//! little-endian `i64`; a prefix of `-1` marks a buffer stored raw because
//! compression did not shrink it. Empty buffers are stored empty, with no
//! prefix.

use std::io::Read;

use bytes::Bytes;
use quiver_error::{QuiverResult, quiver_bail, quiver_err};

/// The codecs permitted for IPC message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    Lz4Frame,
    Zstd,
}

impl CompressionKind {
    /// Both allow-listed codecs are compiled in unconditionally.
    pub fn is_available(&self) -> bool {
        true
    }
}

const LENGTH_PREFIX: usize = size_of::<i64>();
/// Marks a buffer whose bytes follow uncompressed.
const UNCOMPRESSED_MARKER: i64 = -1;

fn compress(kind: CompressionKind, input: &[u8]) -> QuiverResult<Vec<u8>> {
    match kind {
        CompressionKind::Lz4Frame => {
            use std::io::Write;

            let mut encoder = lz4::EncoderBuilder::new()
                .build(Vec::new())
                .map_err(|e| quiver_err!("lz4 encoder: {}", e))?;
            encoder.write_all(input)?;
            let (out, result) = encoder.finish();
            result?;
            Ok(out)
        }
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(input, &mut out, 0)?;
            Ok(out)
        }
    }
}

fn decompress(kind: CompressionKind, input: &[u8], out_len: usize) -> QuiverResult<Vec<u8>> {
    let mut out = vec![0u8; out_len];
    match kind {
        CompressionKind::Lz4Frame => {
            let mut decoder =
                lz4::Decoder::new(input).map_err(|e| quiver_err!(InvalidSerde: "lz4: {}", e))?;
            decoder.read_exact(&mut out)?;
        }
        CompressionKind::Zstd => {
            let mut decoder = zstd::Decoder::new(input)?;
            decoder.read_exact(&mut out)?;
        }
    }
    Ok(out)
}

/// Frame one body buffer: length prefix plus compressed bytes, falling back
/// to the raw marker when compression does not pay for itself.
pub(crate) fn compress_buffer(kind: CompressionKind, input: &Bytes) -> QuiverResult<Bytes> {
    if input.is_empty() {
        return Ok(Bytes::new());
    }
    let compressed = compress(kind, input)?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX + compressed.len().min(input.len()));
    if compressed.len() < input.len() {
        out.extend_from_slice(&(input.len() as i64).to_le_bytes());
        out.extend_from_slice(&compressed);
    } else {
        out.extend_from_slice(&UNCOMPRESSED_MARKER.to_le_bytes());
        out.extend_from_slice(input);
    }
    Ok(Bytes::from(out))
}

/// Undo [`compress_buffer`].
pub(crate) fn decompress_buffer(kind: CompressionKind, input: &Bytes) -> QuiverResult<Bytes> {
    if input.is_empty() {
        return Ok(Bytes::new());
    }
    if input.len() < LENGTH_PREFIX {
        quiver_bail!(InvalidSerde: "compressed buffer of {} bytes lacks a length prefix", input.len());
    }
    let prefix = i64::from_le_bytes(
        input[..LENGTH_PREFIX]
            .try_into()
            .map_err(|_| quiver_err!(InvalidSerde: "malformed compression prefix"))?,
    );
    if prefix == UNCOMPRESSED_MARKER {
        return Ok(input.slice(LENGTH_PREFIX..));
    }
    let out_len = usize::try_from(prefix)
        .map_err(|_| quiver_err!(InvalidSerde: "negative uncompressed length {}", prefix))?;
    Ok(Bytes::from(decompress(
        kind,
        &input[LENGTH_PREFIX..],
        out_len,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_both_codecs() {
        let data = Bytes::from((0..200u8).map(|x| x % 10).collect::<Vec<_>>());
        for kind in [CompressionKind::Lz4Frame, CompressionKind::Zstd] {
            let framed = compress_buffer(kind, &data).unwrap();
            assert_eq!(decompress_buffer(kind, &framed).unwrap(), data);
        }
    }

    #[test]
    fn incompressible_stored_raw() {
        // A short unique buffer will not shrink under either codec.
        let data = Bytes::from_static(&[1, 2, 3]);
        let framed = compress_buffer(CompressionKind::Zstd, &data).unwrap();
        assert_eq!(&framed[..LENGTH_PREFIX], &UNCOMPRESSED_MARKER.to_le_bytes());
        assert_eq!(
            decompress_buffer(CompressionKind::Zstd, &framed).unwrap(),
            data
        );
    }

    #[test]
    fn empty_stays_empty() {
        let framed = compress_buffer(CompressionKind::Lz4Frame, &Bytes::new()).unwrap();
        assert!(framed.is_empty());
        assert!(
            decompress_buffer(CompressionKind::Lz4Frame, &framed)
                .unwrap()
                .is_empty()
        );
    }
}
