// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sharded posting lists: `postings/<prefix>.post`.
//!
//! A shard holds every token sharing its two-character prefix. Tokens are
//! sorted; each token's postings are sorted by (symbol id, position) and the
//! ids are delta-encoded.

use std::collections::BTreeMap;

use crate::errors::DecodeError;
use crate::parser::symbols::SymbolId;
use crate::parser::tokens::tokenize;
use crate::store::codec::{self, Reader};

pub const POSTINGS_MAGIC: &[u8; 4] = b"SXPO";
pub const POSTINGS_DIR: &str = "postings";
pub const SHARD_EXTENSION: &str = "post";

/// Shard name for tokens shorter than two characters or with a prefix that
/// is not ASCII alphanumeric.
pub const SHORT_SHARD: &str = "__";

/// One occurrence of a token in a symbol's display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Posting {
    pub symbol: SymbolId,
    /// Index of the token within the display name's token list.
    pub position: u32,
}

/// token -> sorted postings.
pub type PostingMap = BTreeMap<String, Vec<Posting>>;

pub fn shard_prefix(token: &str) -> String {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(a), Some(b)) if is_shard_char(a) && is_shard_char(b) => format!("{a}{b}"),
        _ => SHORT_SHARD.to_string(),
    }
}

fn is_shard_char(ch: char) -> bool {
    ch.is_ascii_lowercase() || ch.is_ascii_digit()
}

pub fn shard_file_name(prefix: &str) -> String {
    format!("{prefix}.{SHARD_EXTENSION}")
}

/// Stable bucket for `token`; all tokens of one shard share a bucket.
pub fn bucket_of(token: &str, buckets: usize) -> usize {
    let prefix = shard_prefix(token);
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in prefix.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % buckets.max(1) as u64) as usize
}

/// Postings derived from one symbol's display name.
pub fn postings_for(symbol: SymbolId, name: &str) -> Vec<(String, Posting)> {
    tokenize(name)
        .into_iter()
        .enumerate()
        .map(|(position, token)| {
            (
                token,
                Posting {
                    symbol,
                    position: position as u32,
                },
            )
        })
        .collect()
}

/// Sort and dedupe every list in place, dropping empty tokens.
pub fn normalize(map: &mut PostingMap) {
    map.retain(|_, list| {
        list.sort_unstable();
        list.dedup();
        !list.is_empty()
    });
}

/// Group tokens by shard prefix.
pub fn shards(map: &PostingMap) -> BTreeMap<String, Vec<(&str, &[Posting])>> {
    let mut out: BTreeMap<String, Vec<(&str, &[Posting])>> = BTreeMap::new();
    for (token, list) in map {
        out.entry(shard_prefix(token))
            .or_default()
            .push((token.as_str(), list.as_slice()));
    }
    out
}

pub fn encode_shard(entries: &[(&str, &[Posting])]) -> Vec<u8> {
    let mut body = Vec::new();
    codec::write_var_u64(&mut body, entries.len() as u64);
    for (token, list) in entries {
        codec::write_str(&mut body, token);
        codec::write_var_u64(&mut body, list.len() as u64);
        let mut previous = 0u64;
        for posting in list.iter() {
            codec::write_var_u64(&mut body, posting.symbol.0.wrapping_sub(previous));
            codec::write_var_u64(&mut body, u64::from(posting.position));
            previous = posting.symbol.0;
        }
    }
    codec::seal(POSTINGS_MAGIC, &body)
}

pub fn decode_shard(bytes: &[u8]) -> Result<Vec<(String, Vec<Posting>)>, DecodeError> {
    let body = codec::unseal(POSTINGS_MAGIC, bytes)?;
    let mut reader = Reader::new(body);
    let count = reader.read_len()?;
    let mut entries = Vec::with_capacity(count.min(body.len()));
    for _ in 0..count {
        let token = reader.read_str()?.to_string();
        let len = reader.read_len()?;
        let mut list = Vec::with_capacity(len.min(body.len()));
        let mut previous = 0u64;
        for _ in 0..len {
            let symbol = previous.wrapping_add(reader.read_var_u64()?);
            let position = reader.read_var_u32()?;
            list.push(Posting {
                symbol: SymbolId(symbol),
                position,
            });
            previous = symbol;
        }
        entries.push((token, list));
    }
    if !reader.is_empty() {
        return Err(DecodeError::UnexpectedEof(reader.position()));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(symbol: u64, position: u32) -> Posting {
        Posting {
            symbol: SymbolId(symbol),
            position,
        }
    }

    #[test]
    fn shard_prefix_uses_first_two_characters() {
        assert_eq!(shard_prefix("calculate"), "ca");
        assert_eq!(shard_prefix("12"), "12");
        assert_eq!(shard_prefix("x"), SHORT_SHARD);
        assert_eq!(shard_prefix("ünicode"), SHORT_SHARD);
    }

    #[test]
    fn tokens_of_a_shard_share_a_bucket() {
        assert_eq!(bucket_of("calculate", 64), bucket_of("cache", 64));
        assert!(bucket_of("tax", 64) < 64);
        assert_eq!(bucket_of("tax", 0), 0);
    }

    #[test]
    fn postings_follow_token_positions() {
        let list = postings_for(SymbolId(7), "TaxTax");
        assert_eq!(
            list,
            vec![
                ("tax".to_string(), posting(7, 0)),
                ("tax".to_string(), posting(7, 1)),
            ]
        );
    }

    #[test]
    fn shard_encoding_keeps_large_id_gaps() {
        let calc = vec![posting(3, 0), posting(3, 1), posting(u64::MAX - 1, 0)];
        let cache = vec![posting(0, 2)];
        let entries = vec![("cache", cache.as_slice()), ("calculate", calc.as_slice())];

        let decoded = decode_shard(&encode_shard(&entries)).expect("decode shard");
        assert_eq!(decoded[0], ("cache".to_string(), cache));
        assert_eq!(decoded[1], ("calculate".to_string(), calc));
    }

    #[test]
    fn normalize_sorts_and_dedupes() {
        let mut map = PostingMap::new();
        map.insert("tax".into(), vec![posting(9, 0), posting(2, 1), posting(9, 0)]);
        map.insert("gone".into(), Vec::new());
        normalize(&mut map);
        assert_eq!(map["tax"], vec![posting(2, 1), posting(9, 0)]);
        assert!(!map.contains_key("gone"));

        let grouped = shards(&map);
        assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["ta"]);
    }
}
