//! Frame codec over any `Read`/`Write` stream.
//!
//! Each frame is: `[u8 version][u32 big-endian length][postcard payload]`.

use std::io::{self, Read, Write};

use crate::{Frame, signature_of};

/// Current frame protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum allowed frame payload (16 MiB).
pub const MAX_FRAME: u32 = 16 * 1024 * 1024;

/// Encodes `frame` and writes it to `w`.
pub fn write_frame<W: Write>(w: &mut W, frame: &Frame) -> io::Result<()> {
    let payload =
        postcard::to_allocvec(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&n| n <= MAX_FRAME)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "frame exceeds 16 MiB limit"))?;
    w.write_all(&[PROTOCOL_VERSION])?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(&payload)?;
    w.flush()
}

/// Reads one frame from `r`.
///
/// Rejects frames of another protocol version, frames over
/// [`MAX_FRAME`], values nested deeper than
/// [`MAX_DEPTH`](crate::signature::MAX_DEPTH) and frames whose body does
/// not match the header signature.
pub fn read_frame(r: &mut impl Read) -> io::Result<Frame> {
    let mut prefix = [0u8; 5];
    r.read_exact(&mut prefix)?;
    if prefix[0] != PROTOCOL_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported frame version {}", prefix[0]),
        ));
    }
    let len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds 16 MiB limit",
        ));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    let frame: Frame =
        postcard::from_bytes(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if signature_of(&frame.body) != frame.header.signature {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "body does not match header signature",
        ));
    }
    Ok(frame)
}
