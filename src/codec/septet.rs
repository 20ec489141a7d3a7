//! 8-to-7 bit packing for binary payloads
//!
//! File data travels inside SysEx, where every byte must have its high bit clear.
//! Each group of up to seven data bytes is preceded by a header byte whose bit `i`
//! holds the high bit of data byte `i` in that group.

use crate::error::CodecError;

const GROUP: usize = 7;

/// Number of wire bytes needed to carry `len` data bytes.
pub fn encoded_len(len: usize) -> usize {
    len + len.div_ceil(GROUP)
}

/// Encode arbitrary bytes as 7-bit-clean septets.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(data.len()));
    for group in data.chunks(GROUP) {
        let header = group
            .iter()
            .enumerate()
            .fold(0u8, |h, (i, &b)| h | ((b >> 7) << i));
        out.push(header);
        out.extend(group.iter().map(|b| b & 0x7F));
    }
    out
}

/// Decode septets back into 8-bit bytes.
pub fn decode(src: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(src.len() - src.len().div_ceil(GROUP + 1));
    for (index, group) in src.chunks(GROUP + 1).enumerate() {
        let Some((&header, body)) = group.split_first() else { continue };
        if body.is_empty() {
            return Err(CodecError::IncompletePacket {
                offset: index * (GROUP + 1),
                needed: 1,
                available: 0,
            });
        }
        out.extend(
            body.iter()
                .enumerate()
                .map(|(i, &b)| (b & 0x7F) | (((header >> i) & 1) << 7)),
        );
    }
    Ok(out)
}
