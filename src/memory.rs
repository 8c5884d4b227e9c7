use crate::{
    common::Word,
    gas::{Cost, Fork, cost},
    interpreter::Exception,
};

/// Upper bound on addressable memory. Anything beyond is unpayable.
pub const MEMORY_LIMIT: usize = 1 << 32;

/// Cost of a memory of `words` 32-byte words: `3w + w²/512`.
pub fn words_cost(fork: Fork, words: u64) -> u64 {
    cost(fork, Cost::Memory) * words + words * words / cost(fork, Cost::QuadCoeffDiv)
}

/// Resolves a stack-supplied `(offset, size)` pair to a byte range.
///
/// An empty range never touches memory, whatever its offset.
pub fn region(offset: &Word, size: &Word) -> Result<(usize, usize), Exception> {
    if size.is_zero() {
        return Ok((0, 0));
    }
    let offset = offset.to_usize().ok_or(Exception::OutOfGas)?;
    let size = size.to_usize().ok_or(Exception::OutOfGas)?;
    match offset.checked_add(size) {
        Some(end) if end <= MEMORY_LIMIT => Ok((offset, size)),
        _ => Err(Exception::OutOfGas),
    }
}

#[derive(Clone, Debug, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Gas needed to grow to cover `[offset, offset + size)`; zero when covered.
    pub fn expansion_cost(&self, fork: Fork, offset: usize, size: usize) -> u64 {
        if size == 0 {
            return 0;
        }
        let current = (self.data.len() / 32) as u64;
        let required = (offset + size).div_ceil(32) as u64;
        if required <= current {
            return 0;
        }
        words_cost(fork, required) - words_cost(fork, current)
    }

    /// Grows to a whole number of words covering the range. Never shrinks.
    pub fn expand(&mut self, offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        let len = (offset + size).div_ceil(32) * 32;
        if len > self.data.len() {
            self.data.resize(len, 0);
        }
    }

    pub fn load(&self, offset: usize) -> Word {
        Word::from_bytes(&self.data[offset..offset + 32])
    }

    pub fn store(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn read(&self, offset: usize, size: usize) -> Vec<u8> {
        if size == 0 {
            return Vec::new();
        }
        self.data[offset..offset + size].to_vec()
    }

    /// Writes `size` bytes of `src` starting at `src_offset`, zero-filling
    /// whatever lies past the end of `src`.
    pub fn copy_from(&mut self, offset: usize, src: &[u8], src_offset: &Word, size: usize) {
        if size == 0 {
            return;
        }
        let target = &mut self.data[offset..offset + size];
        target.fill(0);
        let Some(start) = src_offset.to_usize().filter(|start| *start < src.len()) else {
            return;
        };
        let n = size.min(src.len() - start);
        target[..n].copy_from_slice(&src[start..start + n]);
    }

    pub fn copy_within(&mut self, src: usize, dst: usize, size: usize) {
        if size == 0 {
            return;
        }
        self.data.copy_within(src..src + size, dst);
    }
}
