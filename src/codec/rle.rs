//! 7-bit-safe run-length codec for display data
//!
//! The device packs its 8-bit screen buffer into bytes that are safe inside a
//! SysEx message (high bit clear). Two packet kinds are mixed freely:
//!
//! - **Dense packet** (marker `< 64`): 2 to 5 literal bytes. The marker range picks
//!   the literal count and `marker - range_offset` is a bitmask of which literals get
//!   their high bit restored.
//!
//!   | marker    | literals |
//!   |-----------|----------|
//!   | `0..4`    | 2        |
//!   | `4..12`   | 3        |
//!   | `12..28`  | 4        |
//!   | `28..60`  | 5        |
//!
//! - **Run packet** (marker `>= 64`): `m = marker - 64`, bit 0 of `m` is the high bit of
//!   the repeated value and `m >> 1` the run length. A run length of `31` means one
//!   extension byte follows and the true length is `31 + ext`. The value byte comes last.
//!
//! Every packet needs at least one byte after its marker, so decoding stops once a
//! single byte is left. A lone trailing byte is padding and is ignored. A packet that
//! starts but runs out of data after its first byte is rejected.

use crate::error::CodecError;
use tracing::trace;

/// Largest decoded output accepted by [`unpack`] when no explicit limit is given.
pub const DEFAULT_UNPACK_LIMIT: usize = 64 * 1024;

/// Worst-case expansion used for the initial capacity guess.
const EXPANSION_FACTOR: usize = 32;

const RUN_MARKER_BASE: u8 = 64;
const RUN_LENGTH_SENTINEL: usize = 31;
const MAX_EXTENDED_RUN: usize = RUN_LENGTH_SENTINEL + 0x7F;

/// Dense marker ranges as `(range_offset, literal_count)`, in marker order.
const DENSE_RANGES: [(u8, usize); 4] = [(0, 2), (4, 3), (12, 4), (28, 5)];
const DENSE_MARKER_END: u8 = 60;

/// Unpack device data using the default output limit.
///
/// `size_hint` is the expected decoded length if known (for a full display frame,
/// the frame size). It only affects the initial allocation.
pub fn unpack(src: &[u8], size_hint: Option<usize>) -> Result<Vec<u8>, CodecError> {
    unpack_bounded(src, size_hint, DEFAULT_UNPACK_LIMIT)
}

/// Unpack device data, refusing to produce more than `limit` bytes.
///
/// Device data is untrusted; `limit` stops a corrupt stream of maximal runs from
/// turning a small message into an arbitrarily large allocation.
pub fn unpack_bounded(
    src: &[u8],
    size_hint: Option<usize>,
    limit: usize,
) -> Result<Vec<u8>, CodecError> {
    let mut out = OutputBuffer::new(src.len(), size_hint, limit)?;
    let mut s = 0usize;

    while s + 1 < src.len() {
        let marker_offset = s;
        let marker = src[s];
        s += 1;

        if marker < RUN_MARKER_BASE {
            let (range_offset, count) = dense_range(marker)
                .ok_or(CodecError::InvalidDenseMarker { marker, offset: marker_offset })?;

            let available = src.len() - s;
            if count > available {
                trace!(offset = marker_offset, count, available, "Dense packet truncated");
                return Err(CodecError::IncompletePacket {
                    offset: marker_offset,
                    needed: count,
                    available,
                });
            }

            let high_bits = marker - range_offset;
            out.reserve(count)?;
            for (j, &byte) in src[s..s + count].iter().enumerate() {
                let high = if high_bits & (1 << j) != 0 { 0x80 } else { 0 };
                out.push((byte & 0x7F) | high);
            }
            s += count;
        } else {
            let m = marker - RUN_MARKER_BASE;
            let high = if m & 1 != 0 { 0x80 } else { 0 };
            let mut run = usize::from(m >> 1);

            if run == RUN_LENGTH_SENTINEL {
                let ext = *src
                    .get(s)
                    .ok_or(CodecError::MissingRunLengthExtension { offset: marker_offset })?;
                run += usize::from(ext);
                s += 1;
            }

            let value = *src.get(s).ok_or(CodecError::MissingValueByte { offset: marker_offset })?;
            s += 1;

            if run == 0 {
                return Err(CodecError::ZeroLengthRun { offset: marker_offset });
            }

            out.fill((value & 0x7F) | high, run)?;
        }
    }

    if s < src.len() {
        trace!(offset = s, byte = src[s], "Ignoring trailing byte");
    }
    Ok(out.into_inner())
}

/// Pack raw 8-bit data into the 7-bit run-length format.
///
/// This is the encoder the device runs; the host only needs it for tests and tooling.
pub fn pack(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + raw.len() / 4 + 2);
    let mut i = 0usize;

    while i < raw.len() {
        let run = run_length_at(raw, i);
        if run >= 2 {
            push_run(&mut out, raw[i], run);
            i += run;
            continue;
        }

        // Collect literals up to the next run (or 5 bytes, the largest dense packet).
        let mut count = 1;
        while count < 5 && i + count < raw.len() && run_length_at(raw, i + count) < 2 {
            count += 1;
        }

        if count == 1 {
            push_run(&mut out, raw[i], 1);
        } else {
            push_dense(&mut out, &raw[i..i + count]);
        }
        i += count;
    }

    out
}

fn dense_range(marker: u8) -> Option<(u8, usize)> {
    if marker >= DENSE_MARKER_END {
        return None;
    }
    DENSE_RANGES
        .iter()
        .rev()
        .find(|(offset, _)| marker >= *offset)
        .copied()
}

fn run_length_at(raw: &[u8], start: usize) -> usize {
    let value = raw[start];
    raw[start..].iter().take(MAX_EXTENDED_RUN).take_while(|&&b| b == value).count()
}

fn push_run(out: &mut Vec<u8>, value: u8, run: usize) {
    debug_assert!((1..=MAX_EXTENDED_RUN).contains(&run));
    let high = value >> 7;
    if run >= RUN_LENGTH_SENTINEL {
        out.push(RUN_MARKER_BASE + ((RUN_LENGTH_SENTINEL as u8) << 1) + high);
        out.push((run - RUN_LENGTH_SENTINEL) as u8);
    } else {
        out.push(RUN_MARKER_BASE + ((run as u8) << 1) + high);
    }
    out.push(value & 0x7F);
}

fn push_dense(out: &mut Vec<u8>, literals: &[u8]) {
    debug_assert!((2..=5).contains(&literals.len()));
    let range_offset = match literals.len() {
        2 => 0,
        3 => 4,
        4 => 12,
        _ => 28,
    };

    let high_bits = literals
        .iter()
        .enumerate()
        .fold(0u8, |mask, (j, &b)| if b & 0x80 != 0 { mask | (1 << j) } else { mask });

    out.push(range_offset + high_bits);
    out.extend(literals.iter().map(|b| b & 0x7F));
}

/// Growable output with geometric growth and a hard ceiling.
struct OutputBuffer {
    data: Vec<u8>,
    limit: usize,
}

impl OutputBuffer {
    fn new(packed_len: usize, size_hint: Option<usize>, limit: usize) -> Result<Self, CodecError> {
        let initial = size_hint
            .unwrap_or_else(|| packed_len.saturating_mul(EXPANSION_FACTOR))
            .min(limit);

        let mut data = Vec::new();
        data.try_reserve_exact(initial)
            .map_err(|_| CodecError::BufferGrowthFailed { requested: initial, limit })?;
        Ok(Self { data, limit })
    }

    fn reserve(&mut self, additional: usize) -> Result<(), CodecError> {
        let needed = self.data.len() + additional;
        if needed > self.limit {
            return Err(CodecError::BufferGrowthFailed { requested: needed, limit: self.limit });
        }
        if needed <= self.data.capacity() {
            return Ok(());
        }

        let target = needed.max(self.data.capacity().saturating_mul(2)).min(self.limit);
        self.data
            .try_reserve_exact(target - self.data.len())
            .map_err(|_| CodecError::BufferGrowthFailed { requested: target, limit: self.limit })
    }

    fn push(&mut self, byte: u8) {
        self.data.push(byte);
    }

    fn fill(&mut self, byte: u8, count: usize) -> Result<(), CodecError> {
        self.reserve(count)?;
        let new_len = self.data.len() + count;
        self.data.resize(new_len, byte);
        Ok(())
    }

    fn into_inner(self) -> Vec<u8> {
        self.data
    }
}
