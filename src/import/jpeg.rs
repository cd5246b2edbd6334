//! Segment-level JPEG rewriting.
//!
//! Some decoders give up on camera JPEGs because of what is stored in the
//! APPn metadata segments (EXIF, ICC profiles, maker notes). [`sanitize`]
//! copies a JPEG stream segment by segment and drops APP0..APP9, leaving
//! everything needed to decode the image untouched.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::ops::RangeInclusive;
use thiserror::Error;

pub const SOI: u16 = 0xFFD8;
pub const EOI: u16 = 0xFFD9;
pub const SOS: u16 = 0xFFDA;
const TEM: u16 = 0xFF01;

/// APP0..APP9. APP10..APP15 stay: APP14 (Adobe) affects colour conversion.
pub const STRIPPED_MARKERS: RangeInclusive<u16> = 0xFFE0..=0xFFE9;

/// RST0..RST7, the only markers allowed inside entropy-coded data.
const RESTART_MARKERS: RangeInclusive<u8> = 0xD0..=0xD7;

const BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("missing SOI marker")]
    MissingStartMarker,

    #[error("bad segment marker 0x{0:04X}; all segment markers should start with 0xFF")]
    BadMarker(u16),

    #[error("segment 0x{marker:04X} declares an impossible length {length}")]
    BadLength { marker: u16, length: u16 },

    #[error("unexpected end of stream inside segment 0x{marker:04X}")]
    Truncated { marker: u16 },

    #[error("end of stream reached before the EOI marker")]
    MissingEndMarker,

    #[error("i/o error while rewriting JPEG: {0}")]
    Io(#[from] io::Error),
}

/// What the sanitizer did to one stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SanitizeSummary {
    pub segments_kept: usize,
    pub segments_stripped: usize,
    /// on-wire bytes of stripped segments, markers included
    pub bytes_stripped: u64,
}

fn is_standalone(marker: u16) -> bool {
    marker == TEM || RESTART_MARKERS.contains(&((marker & 0xFF) as u8))
}

fn read_u8<R: Read>(input: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Big-endian 16 bit read. `Ok(None)` only on a clean end of stream before
/// the first byte; a lone trailing byte is reported as `Truncated`.
fn read_u16<R: Read>(input: &mut R, marker: u16) -> Result<Option<u16>, SanitizeError> {
    let Some(hi) = read_u8(input)? else {
        return Ok(None);
    };
    let lo = read_u8(input)?.ok_or(SanitizeError::Truncated { marker })?;
    Ok(Some(u16::from_be_bytes([hi, lo])))
}

/// Copy (or skip) exactly `len` payload bytes.
fn pass_through<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
    mut len: usize,
    keep: bool,
    marker: u16,
    buf: &mut [u8],
) -> Result<(), SanitizeError> {
    while len > 0 {
        let want = len.min(buf.len());
        let got = match input.read(&mut buf[..want]) {
            Ok(0) => return Err(SanitizeError::Truncated { marker }),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if keep {
            output.write_all(&buf[..got])?;
        }
        len -= got;
    }
    Ok(())
}

/// Copy entropy-coded data up to the next real marker, which is returned
/// unwritten so the caller can decide whether to keep it.
fn pass_through_scan<R: Read, W: Write>(input: &mut R, output: &mut W) -> Result<u16, SanitizeError> {
    loop {
        let b = read_u8(input)?.ok_or(SanitizeError::Truncated { marker: SOS })?;
        if b != 0xFF {
            output.write_all(&[b])?;
            continue;
        }
        let follower = read_u8(input)?.ok_or(SanitizeError::Truncated { marker: SOS })?;
        if follower == 0x00 || RESTART_MARKERS.contains(&follower) {
            output.write_all(&[b, follower])?;
            continue;
        }
        tracing::trace!("jpeg: scan data ends at marker 0xFF{:02X}", follower);
        return Ok(u16::from_be_bytes([0xFF, follower]));
    }
}

/// Rewrite the JPEG on `input` into `output` without APP0..APP9 segments.
///
/// Processing stops at the EOI marker, so padding after it is ignored. Every
/// malformed stream is reported as a [`SanitizeError`]; nothing here panics
/// on bad input.
pub fn sanitize<R: Read, W: Write>(input: R, output: W) -> Result<SanitizeSummary, SanitizeError> {
    let mut input = BufReader::with_capacity(BUFFER_SIZE, input);
    let mut output = BufWriter::with_capacity(BUFFER_SIZE, output);
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut summary = SanitizeSummary::default();

    match read_u16(&mut input, SOI) {
        Ok(Some(SOI)) => {}
        Ok(_) | Err(SanitizeError::Truncated { .. }) => return Err(SanitizeError::MissingStartMarker),
        Err(e) => return Err(e),
    }
    output.write_all(&SOI.to_be_bytes())?;

    let mut pending: Option<u16> = None;

    loop {
        let marker = match pending.take() {
            Some(m) => m,
            None => read_u16(&mut input, EOI)?.ok_or(SanitizeError::MissingEndMarker)?,
        };

        if marker & 0xFF00 != 0xFF00 {
            return Err(SanitizeError::BadMarker(marker));
        }

        tracing::trace!("jpeg: processing segment marker 0x{:04X}", marker);

        if marker == EOI {
            output.write_all(&marker.to_be_bytes())?;
            output.flush()?;
            return Ok(summary);
        }

        if is_standalone(marker) {
            output.write_all(&marker.to_be_bytes())?;
            summary.segments_kept += 1;
            continue;
        }

        let keep = !STRIPPED_MARKERS.contains(&marker);
        let length = read_u16(&mut input, marker)?.ok_or(SanitizeError::Truncated { marker })?;
        if length < 2 {
            return Err(SanitizeError::BadLength { marker, length });
        }

        if keep {
            output.write_all(&marker.to_be_bytes())?;
            output.write_all(&length.to_be_bytes())?;
            summary.segments_kept += 1;
        } else {
            summary.segments_stripped += 1;
            summary.bytes_stripped += 2 + u64::from(length);
        }

        pass_through(&mut input, &mut output, usize::from(length) - 2, keep, marker, &mut buf)?;

        if marker == SOS {
            pending = Some(pass_through_scan(&mut input, &mut output)?);
        }
    }
}

/// In-memory convenience around [`sanitize`].
pub fn sanitize_bytes(data: &[u8]) -> Result<Vec<u8>, SanitizeError> {
    let mut out = Vec::with_capacity(data.len());
    sanitize(data, &mut out)?;
    Ok(out)
}
