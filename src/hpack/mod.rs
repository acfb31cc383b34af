//! Stateful HPACK header compression (spec.md §4.1): integer/string coding,
//! the five field representations, and the encode/decode algorithms against
//! a per-direction dynamic table.

mod huffman;
mod table;

use crate::error::HpackError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use table::{CombinedTable, DynamicTable};

pub use table::STATIC_TABLE;

const DEFAULT_DYNAMIC_TABLE_SIZE: usize = 4096;
/// spec.md §4.1: "The maximum is bounded by min(peer's HEADER_TABLE_SIZE, 64 KiB)".
pub const HEADER_TABLE_SIZE_HARD_LIMIT: usize = 64 * 1024;

/// A decoded or to-be-encoded header field.
pub type HeaderField = (Bytes, Bytes);

// ---------------------------------------------------------------------
// Integer coding (RFC 7541 §5.1)
// ---------------------------------------------------------------------

/// Encodes `value` with an N-bit prefix (1 <= N <= 8), ORing the low bits of
/// the first byte into `first_byte_prefix` (the already-set representation
/// bits above the prefix).
pub fn encode_integer(out: &mut BytesMut, prefix_bits: u8, first_byte_prefix: u8, value: u64) {
    let max_prefix = (1u64 << prefix_bits) - 1;
    if value < max_prefix {
        out.put_u8(first_byte_prefix | value as u8);
        return;
    }

    out.put_u8(first_byte_prefix | max_prefix as u8);
    let mut remaining = value - max_prefix;
    while remaining >= 128 {
        out.put_u8(((remaining % 128) | 0x80) as u8);
        remaining /= 128;
    }
    out.put_u8(remaining as u8);
}

/// Decodes an N-bit-prefix integer from `buf`, returning `(value, low_bits_of_first_byte)`.
/// Rejects overflow past 32 bits per spec.md §4.1.
pub fn decode_integer(buf: &mut Bytes, prefix_bits: u8) -> Result<u64, HpackError> {
    if buf.is_empty() {
        return Err(HpackError::UnexpectedEob);
    }
    let max_prefix = (1u64 << prefix_bits) - 1;
    let first = buf.get_u8();
    let prefix_value = (first as u64) & max_prefix;

    if prefix_value < max_prefix {
        return Ok(prefix_value);
    }

    let mut value = max_prefix;
    let mut shift = 0u32;
    loop {
        if buf.is_empty() {
            return Err(HpackError::UnexpectedEob);
        }
        let b = buf.get_u8();
        let continuation = b & 0x80 != 0;
        let digit = (b & 0x7f) as u64;
        let added = digit
            .checked_shl(shift)
            .ok_or(HpackError::IntegerOverflow)?;
        value = value.checked_add(added).ok_or(HpackError::IntegerOverflow)?;
        if value > u32::MAX as u64 {
            return Err(HpackError::IntegerOverflow);
        }
        if !continuation {
            return Ok(value);
        }
        shift += 7;
        if shift > 35 {
            return Err(HpackError::IntegerOverflow);
        }
    }
}

// ---------------------------------------------------------------------
// String coding (RFC 7541 §5.2)
// ---------------------------------------------------------------------

fn encode_string(out: &mut BytesMut, value: &[u8]) {
    let huffman = huffman::encode(value);
    if huffman.len() < value.len() {
        encode_integer(out, 7, 0x80, huffman.len() as u64);
        out.extend_from_slice(&huffman);
    } else {
        encode_integer(out, 7, 0x00, value.len() as u64);
        out.extend_from_slice(value);
    }
}

fn decode_string(buf: &mut Bytes) -> Result<Bytes, HpackError> {
    if buf.is_empty() {
        return Err(HpackError::UnexpectedEob);
    }
    let huffman_flag = buf[0] & 0x80 != 0;
    let len = decode_integer(buf, 7)? as usize;
    if buf.len() < len {
        return Err(HpackError::UnexpectedEob);
    }
    let raw = buf.split_to(len);
    if huffman_flag {
        Ok(huffman::decode(&raw)?)
    } else {
        Ok(raw)
    }
}

// ---------------------------------------------------------------------
// Never-index heuristic (spec.md §4.1 encode)
// ---------------------------------------------------------------------

fn never_index(name: &[u8], value: &[u8]) -> bool {
    if name.eq_ignore_ascii_case(b"authorization") {
        return true;
    }
    if name.eq_ignore_ascii_case(b"cookie") && value.len() < 20 {
        return true;
    }
    false
}

// ---------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------

pub struct Encoder {
    table: DynamicTable,
    max_size_limit: usize,
    pending_size_update: Option<usize>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_size(DEFAULT_DYNAMIC_TABLE_SIZE)
    }

    pub fn with_size(dynamic_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(dynamic_table_size),
            max_size_limit: dynamic_table_size,
            pending_size_update: None,
        }
    }

    /// Call when the peer's HEADER_TABLE_SIZE setting changes; the actual
    /// bound honored is `min(peer_value, HEADER_TABLE_SIZE_HARD_LIMIT)`.
    pub fn set_max_size(&mut self, peer_header_table_size: usize) {
        let bounded = peer_header_table_size.min(HEADER_TABLE_SIZE_HARD_LIMIT);
        if bounded != self.max_size_limit {
            self.max_size_limit = bounded;
            self.pending_size_update = Some(bounded);
        }
    }

    fn find_match(&self, name: &[u8], value: &[u8]) -> (Option<usize>, Option<usize>) {
        let combined = CombinedTable { dynamic: &self.table };
        let mut name_only: Option<usize> = None;
        for index in 1..=combined.len() {
            let Some(entry) = combined.get(index) else { continue };
            if entry.name.as_ref() == name {
                if entry.value.as_ref() == value {
                    return (Some(index), None);
                }
                if name_only.is_none() {
                    name_only = Some(index);
                }
            }
        }
        (None, name_only)
    }

    /// Encodes a full header list into one header block.
    pub fn encode<'a, I>(&mut self, headers: I) -> Bytes
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let mut out = BytesMut::new();

        if let Some(size) = self.pending_size_update.take() {
            encode_integer(&mut out, 5, 0x20, size as u64);
            self.table.set_max_size(size);
        }

        for (name, value) in headers {
            let (exact, name_only) = self.find_match(name, value);
            if let Some(index) = exact {
                encode_integer(&mut out, 7, 0x80, index as u64);
                continue;
            }

            let indexable = !never_index(name, value);
            let prefix_bits = if indexable { 6 } else { 4 };
            let repr_bits: u8 = if indexable { 0x40 } else { 0x10 };

            match name_only {
                Some(index) => {
                    encode_integer(&mut out, prefix_bits, repr_bits, index as u64);
                }
                None => {
                    encode_integer(&mut out, prefix_bits, repr_bits, 0);
                    encode_string(&mut out, name);
                }
            }
            encode_string(&mut out, value);

            if indexable {
                self.table.insert(Bytes::copy_from_slice(name), Bytes::copy_from_slice(value));
            }
        }

        out.freeze()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------

pub struct Decoder {
    table: DynamicTable,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_size(DEFAULT_DYNAMIC_TABLE_SIZE)
    }

    pub fn with_size(dynamic_table_size: usize) -> Self {
        Self { table: DynamicTable::new(dynamic_table_size) }
    }

    /// Decodes a full header block, invoking `on_header` for each field in
    /// wire order. `max_header_list_size` bounds the running decoded size
    /// (spec.md §4.1's size-exceeded accounting); pass `u64::MAX` to disable.
    ///
    /// Exceeding the budget doesn't stop decoding immediately: a field
    /// representation that pushes the block over budget might still be a
    /// literal-with-incremental-indexing that the peer's future header
    /// blocks will reference by index, so decoding continues (keeping the
    /// dynamic table in sync) until either the block ends or the running
    /// size passes twice the budget -- the bound spec.md's P2 names for how
    /// late the error can be reported.
    ///
    /// On `Ok`, every field representation in the block was consumed and the
    /// dynamic table is in sync with the peer's view of it, even if
    /// individual fields were semantically invalid at the HTTP/2 level
    /// (that classification is the caller's job -- see spec.md §4.1).
    pub fn decode_with_cb(
        &mut self,
        mut data: Bytes,
        max_header_list_size: u64,
        mut on_header: impl FnMut(Bytes, Bytes),
    ) -> Result<(), HpackError> {
        let mut seen_field = false;
        let mut decoded_size: u64 = 0;
        let mut exceeded = false;
        let hard_ceiling = max_header_list_size.saturating_mul(2);

        while !data.is_empty() {
            let first = data[0];

            if first & 0x80 != 0 {
                // Indexed Header Field
                let index = decode_integer(&mut data, 7)? as usize;
                if index == 0 {
                    return Err(HpackError::InvalidIndex(0));
                }
                let (name, value) = self.lookup(index)?;
                decoded_size += name.len() as u64 + value.len() as u64 + 32;
                seen_field = true;
                on_header(name, value);
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing
                let (name, value) = self.decode_literal(&mut data, 6)?;
                self.table.insert(name.clone(), value.clone());
                decoded_size += name.len() as u64 + value.len() as u64 + 32;
                seen_field = true;
                on_header(name, value);
            } else if first & 0x20 != 0 {
                // Dynamic table size update
                if seen_field {
                    return Err(HpackError::LateTableSizeUpdate);
                }
                let size = decode_integer(&mut data, 5)? as usize;
                self.table.set_max_size(size);
            } else {
                // Literal never-indexed (0001) or without indexing (0000) --
                // both are prefix 4 and decoded identically.
                let (name, value) = self.decode_literal(&mut data, 4)?;
                decoded_size += name.len() as u64 + value.len() as u64 + 32;
                seen_field = true;
                on_header(name, value);
            }

            if decoded_size > max_header_list_size {
                exceeded = true;
            }
            if decoded_size > hard_ceiling {
                return Err(HpackError::SizeExceeded);
            }
        }

        if exceeded {
            return Err(HpackError::SizeExceeded);
        }

        Ok(())
    }

    fn lookup(&self, index: usize) -> Result<(Bytes, Bytes), HpackError> {
        let combined = CombinedTable { dynamic: &self.table };
        combined
            .get(index)
            .map(|e| (e.name.clone(), e.value.clone()))
            .ok_or(HpackError::InvalidIndex(index))
    }

    fn decode_literal(
        &self,
        data: &mut Bytes,
        prefix_bits: u8,
    ) -> Result<(Bytes, Bytes), HpackError> {
        let index = decode_integer(data, prefix_bits)? as usize;
        let name = if index == 0 {
            decode_string(data)?
        } else {
            let combined = CombinedTable { dynamic: &self.table };
            combined.get(index).map(|e| e.name.clone()).ok_or(HpackError::InvalidIndex(index))?
        };
        let value = decode_string(data)?;
        Ok((name, value))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
