use fxvm_core::{read_word, write_word};

/// A zero initialised, word addressed byte buffer.
///
/// The length is always a multiple of 4 bytes. All words are little endian.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    data: Box<[u8]>,
}

impl Memory {
    /// Allocate at least `bytes` bytes, rounded up to a whole word.
    pub fn zeroed(bytes: usize) -> Self {
        Self {
            data: vec![0; bytes.div_ceil(4) * 4].into_boxed_slice(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut memory = Self::zeroed(bytes.len());
        memory.data[..bytes.len()].copy_from_slice(bytes);
        memory
    }

    pub fn words(&self) -> usize {
        self.data.len() / 4
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn read(&self, word: u32) -> Option<u32> {
        let offset = word as usize * 4;
        (offset + 4 <= self.data.len()).then(|| read_word(&self.data, offset))
    }

    /// Write a word, returns `None` when `word` is out of range.
    pub fn write(&mut self, word: u32, value: u32) -> Option<()> {
        let offset = word as usize * 4;
        (offset + 4 <= self.data.len()).then(|| write_word(&mut self.data, offset, value))
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.data.len().min(64);
        write!(f, "Memory[{}](", self.data.len())?;
        for byte in &self.data[..shown] {
            write!(f, "{byte:02x} ")?;
        }
        if shown < self.data.len() {
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_words() {
        let memory = Memory::from_bytes(&[1, 2, 3, 4, 5]);
        assert_eq!(memory.len(), 8);
        assert_eq!(memory.words(), 2);
        assert_eq!(memory.read(0), Some(0x04030201));
        assert_eq!(memory.read(1), Some(5));
        assert_eq!(memory.read(2), None);
    }

    #[test]
    fn write_bounds() {
        let mut memory = Memory::zeroed(8);
        assert_eq!(memory.write(1, 0xdeadbeef), Some(()));
        assert_eq!(memory.write(2, 1), None);
        assert_eq!(&memory.bytes()[4..], &[0xef, 0xbe, 0xad, 0xde]);
    }

    #[test]
    fn debug_dump() {
        let memory = Memory::from_bytes(&[0xab; 4]);
        assert_eq!(format!("{memory:?}"), "Memory[4](ab ab ab ab )");
    }
}
