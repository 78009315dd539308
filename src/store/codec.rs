// SPDX-License-Identifier: MIT OR Apache-2.0

//! Binary encoding primitives for index tables.
//!
//! Sealed table layout (little endian):
//! [magic: 4 bytes] [format version: u32] [body...] [blake3 of preceding bytes: 32]
//!
//! Integers inside bodies are LEB128-style unsigned varints; strings are a
//! varint length followed by UTF-8 bytes.

use crate::errors::DecodeError;

pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8;
const CHECKSUM_LEN: usize = 32;

pub fn write_var_u64(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn write_str(out: &mut Vec<u8>, value: &str) {
    write_var_u64(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

pub fn write_opt_str(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(value) => {
            out.push(1);
            write_str(out, value);
        }
        None => out.push(0),
    }
}

/// Wrap `body` with the magic header and checksum trailer.
pub fn seal(magic: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len() + CHECKSUM_LEN);
    out.extend_from_slice(magic);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(body);
    let checksum = blake3::hash(&out);
    out.extend_from_slice(checksum.as_bytes());
    out
}

/// Verify header and checksum, returning the body.
pub fn unseal<'a>(magic: &[u8; 4], bytes: &'a [u8]) -> Result<&'a [u8], DecodeError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(DecodeError::UnexpectedEof(bytes.len()));
    }
    if &bytes[..4] != magic {
        return Err(DecodeError::BadMagic);
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedFormat(version));
    }
    let (content, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if blake3::hash(content).as_bytes() != trailer {
        return Err(DecodeError::ChecksumMismatch);
    }
    Ok(&content[HEADER_LEN..])
}

/// Header for append-only logs: magic plus format version, no trailer.
pub fn log_header(magic: &[u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(magic);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out
}

/// Append one log frame: `[varint len][payload][first 4 bytes of blake3(payload)]`.
pub fn write_frame(out: &mut Vec<u8>, payload: &[u8]) {
    write_var_u64(out, payload.len() as u64);
    out.extend_from_slice(payload);
    out.extend_from_slice(&blake3::hash(payload).as_bytes()[..FRAME_CHECK_LEN]);
}

const FRAME_CHECK_LEN: usize = 4;

/// Iterate the frames of an append-only log.
pub fn read_frames<'a>(magic: &[u8; 4], bytes: &'a [u8]) -> Result<Vec<&'a [u8]>, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::UnexpectedEof(bytes.len()));
    }
    let mut reader = Reader::new(bytes);
    if reader.read_bytes(4)? != magic {
        return Err(DecodeError::BadMagic);
    }
    let version = reader.read_u32_le()?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedFormat(version));
    }
    let mut frames = Vec::new();
    while !reader.is_empty() {
        let len = reader.read_len()?;
        let payload = reader.read_bytes(len)?;
        let check = reader.read_bytes(FRAME_CHECK_LEN)?;
        if &blake3::hash(payload).as_bytes()[..FRAME_CHECK_LEN] != check {
            return Err(DecodeError::ChecksumMismatch);
        }
        frames.push(payload);
    }
    Ok(frames)
}

/// Cursor over an encoded body.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_var_u64(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut shift = 0u32;
        let mut out = 0u64;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(DecodeError::VarintOverflow(start));
            }
            out |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(out);
            }
            shift += 7;
        }
    }

    pub fn read_var_u32(&mut self) -> Result<u32, DecodeError> {
        let start = self.pos;
        u32::try_from(self.read_var_u64()?).map_err(|_| DecodeError::VarintOverflow(start))
    }

    pub fn read_len(&mut self) -> Result<usize, DecodeError> {
        let start = self.pos;
        usize::try_from(self.read_var_u64()?).map_err(|_| DecodeError::VarintOverflow(start))
    }

    pub fn read_str(&mut self) -> Result<&'a str, DecodeError> {
        let len = self.read_len()?;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    pub fn read_opt_str(&mut self) -> Result<Option<&'a str>, DecodeError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => self.read_str().map(Some),
            tag => Err(DecodeError::InvalidTag(tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_var_u64(&mut buf, value);
            let mut reader = Reader::new(&buf);
            assert_eq!(reader.read_var_u64(), Ok(value));
            assert!(reader.is_empty());
        }
        let mut small = Vec::new();
        write_var_u64(&mut small, 127);
        assert_eq!(small.len(), 1);
    }

    #[test]
    fn truncated_input_reports_eof() {
        let mut buf = Vec::new();
        write_str(&mut buf, "calculate");
        buf.truncate(4);
        let mut reader = Reader::new(&buf);
        assert!(matches!(reader.read_str(), Err(DecodeError::UnexpectedEof(_))));
    }

    #[test]
    fn seal_detects_tampering() {
        let sealed = seal(b"TEST", b"payload");
        assert_eq!(unseal(b"TEST", &sealed), Ok(&b"payload"[..]));
        assert_eq!(unseal(b"NOPE", &sealed), Err(DecodeError::BadMagic));

        let mut tampered = sealed.clone();
        tampered[9] ^= 0xFF;
        assert_eq!(unseal(b"TEST", &tampered), Err(DecodeError::ChecksumMismatch));
        assert!(matches!(
            unseal(b"TEST", &sealed[..10]),
            Err(DecodeError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn log_frames_replay_in_order() {
        let mut log = log_header(b"LOGT");
        write_frame(&mut log, b"first");
        write_frame(&mut log, b"");
        write_frame(&mut log, b"third");
        let frames = read_frames(b"LOGT", &log).expect("frames");
        assert_eq!(frames, vec![&b"first"[..], &b""[..], &b"third"[..]]);

        let header_only = log_header(b"LOGT");
        assert!(read_frames(b"LOGT", &header_only).expect("empty log").is_empty());
    }

    #[test]
    fn torn_log_frame_is_rejected() {
        let mut log = log_header(b"LOGT");
        write_frame(&mut log, b"payload");
        let torn = &log[..log.len() - 2];
        assert!(matches!(
            read_frames(b"LOGT", torn),
            Err(DecodeError::UnexpectedEof(_))
        ));

        let last = log.len() - 1;
        log[last] ^= 0xFF;
        assert_eq!(read_frames(b"LOGT", &log), Err(DecodeError::ChecksumMismatch));
    }

    #[test]
    fn optional_strings() {
        let mut buf = Vec::new();
        write_opt_str(&mut buf, Some("doc"));
        write_opt_str(&mut buf, None);
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_opt_str(), Ok(Some("doc")));
        assert_eq!(reader.read_opt_str(), Ok(None));
    }
}
