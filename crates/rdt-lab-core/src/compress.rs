//! Payload compression applied to a whole file before fragmentation.
//!
//! The Huffman stream is self-describing:
//!
//! ```text
//! [original length: u32 BE][symbol count: u16 BE]
//! [symbol count x (symbol: u8, code length: u8)]
//! [bit stream, MSB first, zero-padded to a byte]
//! ```
//!
//! Codes are canonical, so only the code lengths travel in the table.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use rdt_lab_abstract::Compression;

use crate::error::CodecError;

pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

pub fn compressor_for(kind: Compression) -> Arc<dyn Compressor> {
    match kind {
        Compression::Huffman => Arc::new(HuffmanCompressor),
        Compression::None => Arc::new(Identity),
    }
}

/// Passes bytes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Compressor for Identity {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HuffmanCompressor;

const HEADER_LEN: usize = 6;
/// Longest code accepted by the decoder; real inputs stay far below it.
const MAX_CODE_LEN: u8 = 63;

impl Compressor for HuffmanCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let original_len = length_header(data.len())?;

        let mut freq = [0u64; 256];
        for &byte in data {
            freq[usize::from(byte)] += 1;
        }

        let table = canonical_codes(&code_lengths(&freq));

        let mut out = Vec::with_capacity(HEADER_LEN + table.len() * 2 + data.len() / 2);
        out.extend_from_slice(&original_len);
        out.extend_from_slice(&(table.len() as u16).to_be_bytes());
        for entry in &table {
            out.push(entry.symbol);
            out.push(entry.len);
        }

        let mut codes = [(0u64, 0u8); 256];
        for entry in &table {
            codes[usize::from(entry.symbol)] = (entry.code, entry.len);
        }

        let mut writer = BitWriter::new(out);
        for &byte in data {
            let (code, len) = codes[usize::from(byte)];
            writer.write(code, len);
        }
        Ok(writer.finish())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::Truncated("header"));
        }
        let original_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let count = usize::from(u16::from_be_bytes([data[4], data[5]]));

        let table_end = HEADER_LEN + count * 2;
        if data.len() < table_end {
            return Err(CodecError::Truncated("code table"));
        }
        if original_len == 0 {
            return Ok(Vec::new());
        }
        if count == 0 || count > 256 {
            return Err(CodecError::InvalidTable);
        }

        let mut lengths = [0u8; 256];
        for pair in data[HEADER_LEN..table_end].chunks_exact(2) {
            let (symbol, len) = (usize::from(pair[0]), pair[1]);
            if len == 0 || len > MAX_CODE_LEN || lengths[symbol] != 0 {
                return Err(CodecError::InvalidTable);
            }
            lengths[symbol] = len;
        }

        let decoder = Decoder::new(&lengths)?;
        decoder.decode(&data[table_end..], original_len)
    }
}

fn length_header(len: usize) -> Result<[u8; 4], CodecError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| CodecError::InputTooLarge(len))
}

#[derive(Debug, Clone, Copy)]
struct CodeEntry {
    symbol: u8,
    len: u8,
    code: u64,
}

/// Huffman code length per byte value; zero for absent symbols.
fn code_lengths(freq: &[u64; 256]) -> [u8; 256] {
    let mut lengths = [0u8; 256];
    let present: Vec<usize> = (0..256).filter(|&s| freq[s] > 0).collect();

    match present.as_slice() {
        [] => return lengths,
        [only] => {
            lengths[*only] = 1;
            return lengths;
        }
        _ => {}
    }

    // Nodes 0..present.len() are leaves; merged nodes are appended.
    let mut parent: Vec<usize> = vec![usize::MAX; present.len()];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = present
        .iter()
        .enumerate()
        .map(|(node, &symbol)| Reverse((freq[symbol], node)))
        .collect();

    while let (Some(Reverse((w1, a))), Some(Reverse((w2, b)))) = (heap.pop(), heap.pop()) {
        let merged = parent.len();
        parent.push(usize::MAX);
        parent[a] = merged;
        parent[b] = merged;
        heap.push(Reverse((w1 + w2, merged)));
    }

    for (leaf, &symbol) in present.iter().enumerate() {
        let mut depth = 0u8;
        let mut node = leaf;
        while parent[node] != usize::MAX {
            node = parent[node];
            depth += 1;
        }
        lengths[symbol] = depth;
    }
    lengths
}

/// Assign canonical codes: shorter codes first, ties broken by symbol value.
fn canonical_codes(lengths: &[u8; 256]) -> Vec<CodeEntry> {
    let mut entries: Vec<CodeEntry> = (0..=255u8)
        .filter(|&s| lengths[usize::from(s)] > 0)
        .map(|symbol| CodeEntry {
            symbol,
            len: lengths[usize::from(symbol)],
            code: 0,
        })
        .collect();
    entries.sort_by_key(|entry| (entry.len, entry.symbol));

    let mut code = 0u64;
    let mut prev_len = 0u8;
    for entry in &mut entries {
        code <<= entry.len - prev_len;
        entry.code = code;
        code += 1;
        prev_len = entry.len;
    }
    entries
}

/// Canonical decoding tables indexed by code length.
struct Decoder {
    symbols: Vec<u8>,
    first_code: [u64; MAX_CODE_LEN as usize + 1],
    first_index: [usize; MAX_CODE_LEN as usize + 1],
    count: [usize; MAX_CODE_LEN as usize + 1],
    max_len: u8,
}

impl Decoder {
    fn new(lengths: &[u8; 256]) -> Result<Self, CodecError> {
        let entries = canonical_codes(lengths);
        let mut decoder = Decoder {
            symbols: Vec::with_capacity(entries.len()),
            first_code: [0; MAX_CODE_LEN as usize + 1],
            first_index: [0; MAX_CODE_LEN as usize + 1],
            count: [0; MAX_CODE_LEN as usize + 1],
            max_len: 0,
        };

        for (index, entry) in entries.iter().enumerate() {
            // Over-subscribed tables run out of codes of this length.
            if entry.code >> entry.len != 0 {
                return Err(CodecError::InvalidTable);
            }
            let len = usize::from(entry.len);
            if decoder.count[len] == 0 {
                decoder.first_code[len] = entry.code;
                decoder.first_index[len] = index;
            }
            decoder.count[len] += 1;
            decoder.max_len = entry.len;
            decoder.symbols.push(entry.symbol);
        }
        Ok(decoder)
    }

    fn decode(&self, bits: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(expected);
        let mut reader = BitReader::new(bits);

        while out.len() < expected {
            let mut code = 0u64;
            let mut len = 0usize;
            loop {
                let bit = reader.next().ok_or(CodecError::ShortBitStream {
                    decoded: out.len(),
                    expected,
                })?;
                code = (code << 1) | u64::from(bit);
                len += 1;
                if len > usize::from(self.max_len) {
                    return Err(CodecError::InvalidTable);
                }
                let count = self.count[len] as u64;
                let first = self.first_code[len];
                if count > 0 && code >= first && code - first < count {
                    let offset = (code - first) as usize;
                    out.push(self.symbols[self.first_index[len] + offset]);
                    break;
                }
            }
        }
        Ok(out)
    }
}

struct BitWriter {
    out: Vec<u8>,
    current: u8,
    filled: u8,
}

impl BitWriter {
    fn new(out: Vec<u8>) -> Self {
        Self {
            out,
            current: 0,
            filled: 0,
        }
    }

    fn write(&mut self, code: u64, len: u8) {
        for shift in (0..len).rev() {
            let bit = ((code >> shift) & 1) as u8;
            self.current = (self.current << 1) | bit;
            self.filled += 1;
            if self.filled == 8 {
                self.out.push(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.out.push(self.current << (8 - self.filled));
        }
        self.out
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }
}

impl Iterator for BitReader<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let byte = *self.bytes.get(self.position / 8)?;
        let bit = (byte >> (7 - self.position % 8)) & 1;
        self.position += 1;
        Some(bit)
    }
}
