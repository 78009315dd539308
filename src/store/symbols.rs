// SPDX-License-Identifier: MIT OR Apache-2.0

//! `symbols.tab`: length-prefixed SymbolRecord entries keyed by a 64-bit id.
//!
//! Entries are grouped by file path (sorted) and keep the extractor's order
//! within a file.

use crate::errors::DecodeError;
use crate::parser::symbols::{Span, SymbolId, SymbolKind, SymbolRecord};
use crate::store::codec::{self, Reader};

pub const SYMBOLS_MAGIC: &[u8; 4] = b"SXSY";

/// A symbol together with its assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSymbol {
    pub id: SymbolId,
    pub record: SymbolRecord,
}

pub fn encode_table(symbols: &[StoredSymbol]) -> Vec<u8> {
    let mut body = Vec::with_capacity(symbols.len() * 96);
    codec::write_var_u64(&mut body, symbols.len() as u64);
    let mut entry = Vec::with_capacity(256);
    for symbol in symbols {
        entry.clear();
        encode_record(&mut entry, &symbol.record);
        body.extend_from_slice(&symbol.id.0.to_le_bytes());
        codec::write_var_u64(&mut body, entry.len() as u64);
        body.extend_from_slice(&entry);
    }
    codec::seal(SYMBOLS_MAGIC, &body)
}

pub fn decode_table(bytes: &[u8]) -> Result<Vec<StoredSymbol>, DecodeError> {
    let body = codec::unseal(SYMBOLS_MAGIC, bytes)?;
    let mut reader = Reader::new(body);
    let count = reader.read_len()?;
    let mut symbols = Vec::with_capacity(count.min(body.len()));
    for _ in 0..count {
        let id = SymbolId(reader.read_u64_le()?);
        let len = reader.read_len()?;
        let mut entry = Reader::new(reader.read_bytes(len)?);
        let record = decode_record(&mut entry)?;
        symbols.push(StoredSymbol { id, record });
    }
    if !reader.is_empty() {
        return Err(DecodeError::UnexpectedEof(reader.position()));
    }
    Ok(symbols)
}

pub(crate) fn encode_record(out: &mut Vec<u8>, record: &SymbolRecord) {
    codec::write_str(out, &record.path);
    codec::write_var_u64(out, record.byte_offset);
    out.push(record.kind.code());
    codec::write_str(out, &record.name);
    codec::write_str(out, &record.qualified_name);
    codec::write_opt_str(out, record.container.as_deref());
    codec::write_str(out, &record.signature);
    codec::write_opt_str(out, record.doc.as_deref());
    for value in [
        record.span.start_line,
        record.span.start_col,
        record.span.end_line,
        record.span.end_col,
    ] {
        codec::write_var_u64(out, u64::from(value));
    }
    out.push(u8::from(record.exported));
}

pub(crate) fn decode_record(reader: &mut Reader<'_>) -> Result<SymbolRecord, DecodeError> {
    let path = reader.read_str()?.to_string();
    let byte_offset = reader.read_var_u64()?;
    let code = reader.read_u8()?;
    let kind = SymbolKind::from_code(code).ok_or(DecodeError::InvalidKind(code))?;
    let name = reader.read_str()?.to_string();
    let qualified_name = reader.read_str()?.to_string();
    let container = reader.read_opt_str()?.map(str::to_string);
    let signature = reader.read_str()?.to_string();
    let doc = reader.read_opt_str()?.map(str::to_string);
    let span = Span {
        start_line: reader.read_var_u32()?,
        start_col: reader.read_var_u32()?,
        end_line: reader.read_var_u32()?,
        end_col: reader.read_var_u32()?,
    };
    let exported = match reader.read_u8()? {
        0 => false,
        1 => true,
        tag => return Err(DecodeError::InvalidTag(tag)),
    };
    Ok(SymbolRecord {
        path,
        byte_offset,
        kind,
        name,
        qualified_name,
        container,
        signature,
        doc,
        span,
        exported,
    })
}
