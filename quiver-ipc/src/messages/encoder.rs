use std::io::Write;

use bytes::Bytes;
use quiver_error::{QuiverResult, quiver_err};

use crate::messages::CONTINUATION_MARKER;

static ZEROS: [u8; 512] = [0; 512];

/// The envelope prefix: continuation marker plus metadata length.
pub const MESSAGE_PREFIX_LENGTH: usize = 8;
/// The legacy envelope carries the metadata length alone.
pub const LEGACY_MESSAGE_PREFIX_LENGTH: usize = 4;

fn write_padding<W: Write>(sink: &mut W, mut padding: usize) -> QuiverResult<()> {
    while padding > 0 {
        let chunk = padding.min(ZEROS.len());
        sink.write_all(&ZEROS[..chunk])?;
        padding -= chunk;
    }
    Ok(())
}

/// Frame one message: prefix, metadata, padding to `alignment`, then the
/// body buffers verbatim (they carry their own padding). Returns the length
/// of the metadata segment, prefix and padding included: the value a file
/// footer block records.
pub(crate) fn write_message<W: Write>(
    sink: &mut W,
    metadata: &[u8],
    body: &[Bytes],
    alignment: usize,
    legacy: bool,
) -> QuiverResult<u32> {
    let prefix = if legacy {
        LEGACY_MESSAGE_PREFIX_LENGTH
    } else {
        MESSAGE_PREFIX_LENGTH
    };
    let aligned = (prefix + metadata.len()).next_multiple_of(alignment);
    let flatbuffer_length = u32::try_from(aligned - prefix)
        .map_err(|_| quiver_err!("message metadata of {} bytes is too large", metadata.len()))?;

    if !legacy {
        sink.write_all(&CONTINUATION_MARKER.to_le_bytes())?;
    }
    sink.write_all(&flatbuffer_length.to_le_bytes())?;
    sink.write_all(metadata)?;
    write_padding(sink, aligned - prefix - metadata.len())?;

    for buffer in body {
        sink.write_all(buffer)?;
    }

    u32::try_from(aligned).map_err(|_| quiver_err!("message metadata too large"))
}

/// The end-of-stream marker: a zero length where a message would start,
/// preceded by the continuation marker in the non-legacy envelope.
pub(crate) fn write_eos<W: Write>(sink: &mut W, legacy: bool) -> QuiverResult<usize> {
    if legacy {
        sink.write_all(&0u32.to_le_bytes())?;
        Ok(LEGACY_MESSAGE_PREFIX_LENGTH)
    } else {
        sink.write_all(&CONTINUATION_MARKER.to_le_bytes())?;
        sink.write_all(&0u32.to_le_bytes())?;
        Ok(MESSAGE_PREFIX_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_alignment() {
        for alignment in [8usize, 64] {
            let mut out = Vec::new();
            let metadata = vec![7u8; 10];
            let body = [Bytes::from_static(b"abcdef")];
            let written = write_message(&mut out, &metadata, &body, alignment, false).unwrap();
            let aligned = (MESSAGE_PREFIX_LENGTH + metadata.len()).next_multiple_of(alignment);
            assert_eq!(written as usize, aligned);
            assert_eq!(out.len(), aligned + 6);
            // Little-endian length at bytes 4..8, padding included,
            // prefix excluded.
            let length = u32::from_le_bytes(out[4..8].try_into().unwrap());
            assert_eq!(length as usize, aligned - MESSAGE_PREFIX_LENGTH);
        }
    }

    #[test]
    fn legacy_omits_continuation() {
        let mut out = Vec::new();
        write_message(&mut out, &[1u8; 4], &[], 8, true).unwrap();
        assert_eq!(u32::from_le_bytes(out[0..4].try_into().unwrap()), 4);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn eos_markers() {
        let mut out = Vec::new();
        write_eos(&mut out, false).unwrap();
        assert_eq!(out, [0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]);
        let mut out = Vec::new();
        write_eos(&mut out, true).unwrap();
        assert_eq!(out, [0, 0, 0, 0]);
    }
}
