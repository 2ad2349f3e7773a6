use std::io::{Read, Write};

use crate::raft::rpc::Envelope;
use crate::util::errors::{RaftError, Result};

/// Upper bound on a single encoded message, guarding reads against
/// corrupted or hostile length prefixes.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Frames an envelope as a big-endian u32 length prefix followed by its
/// bincode encoding.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    let body = bincode::serialize(envelope)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(RaftError::FrameTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Writes one framed envelope to `writer`.
pub fn write_envelope(writer: &mut impl Write, envelope: &Envelope) -> Result<()> {
    let frame = encode(envelope)?;
    writer.write_all(&frame)?;
    Ok(())
}

/// Reads one framed envelope from `reader`.
pub fn read_envelope(reader: &mut impl Read) -> Result<Envelope> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(RaftError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(bincode::deserialize(&body)?)
}
