//! Length-prefixed framing.
//!
//! A frame is a 32-bit big-endian payload length followed by that many
//! payload bytes. Both directions enforce their size cap on the announced
//! length before any payload byte moves, so a runaway peer can neither
//! force a large allocation on read nor push an oversized frame onto the
//! wire.

use std::io::{Read, Write};

use projection_error::{Direction, ProjectionError, Result};

const HEADER_LEN: usize = 4;

fn enforce_cap(direction: Direction, len: usize, cap: usize) -> Result<()> {
    if len > cap {
        return Err(ProjectionError::FrameTooLarge {
            direction,
            len,
            max: cap,
        });
    }
    Ok(())
}

/// Read one frame payload, enforcing `cap` on the announced length.
pub fn read_frame(reader: &mut impl Read, direction: Direction, cap: usize) -> Result<Vec<u8>> {
    let mut header = [0_u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let announced = u32::from_be_bytes(header) as usize;
    enforce_cap(direction, announced, cap)?;

    let mut body = vec![0_u8; announced];
    reader.read_exact(&mut body)?;
    Ok(body)
}

/// Write one frame, enforcing `cap` before anything hits the wire.
pub fn write_frame(
    writer: &mut impl Write,
    body: &[u8],
    direction: Direction,
    cap: usize,
) -> Result<()> {
    enforce_cap(direction, body.len(), cap)?;
    let announced = u32::try_from(body.len())
        .map_err(|_| ProjectionError::internal("frame length does not fit the u32 header"))?;
    writer.write_all(&announced.to_be_bytes())?;
    writer.write_all(body)?;
    Ok(())
}
