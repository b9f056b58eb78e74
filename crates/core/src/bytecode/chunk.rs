use crate::ProgramError;

/// Chunk identifiers of the bytecode container.
///
/// A container is a sequence of `[type: u32, length_in_words: u32, content...]` records,
/// all little endian. Unknown chunk types are skipped by the decoder.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[repr(u32)]
pub enum ChunkType {
    Constants = 0,
    Layout = 1,
    Code = 2,
    Externs = 3,
    Uavs = 6,
    Numthreads = 7,
    Result = 8,
}

impl ChunkType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => ChunkType::Constants,
            1 => ChunkType::Layout,
            2 => ChunkType::Code,
            3 => ChunkType::Externs,
            6 => ChunkType::Uavs,
            7 => ChunkType::Numthreads,
            8 => ChunkType::Result,
            _ => return None,
        })
    }
}

#[derive(Default)]
pub struct ChunkWriter {
    data: Vec<u8>,
}

impl ChunkWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }

    /// Append `content` as a chunk of the given type, padding it to whole words.
    pub fn write_chunk(&mut self, ty: ChunkType, content: &[u8]) {
        let words = content.len().div_ceil(4);
        self.write_u32(ty as u32);
        self.write_u32(words as u32);
        self.write_bytes(content);
        self.data.resize(self.data.len() + words * 4 - content.len(), 0);
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

pub struct ChunkReader<'a> {
    data: &'a [u8],
    offset: usize,
    what: &'static str,
}

impl<'a> ChunkReader<'a> {
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, offset: 0, what }
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProgramError> {
        let end = self.offset.checked_add(len).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.offset..end];
                self.offset = end;
                Ok(bytes)
            }
            None => Err(ProgramError::Truncated {
                what: self.what,
                offset: self.offset,
                needed: len,
                available: self.data.len().saturating_sub(self.offset),
            }),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, ProgramError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProgramError> {
        self.read_u32().map(|x| x as i32)
    }

    pub fn read_str(&mut self) -> Result<String, ProgramError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProgramError::InvalidString(self.what))
    }

    /// Read the next `(type, content)` chunk record.
    pub fn read_chunk(&mut self) -> Result<(u32, &'a [u8]), ProgramError> {
        let ty = self.read_u32()?;
        let words = self.read_u32()? as usize;
        let content = self.read_bytes(words * 4)?;
        Ok((ty, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_padding() {
        let mut writer = ChunkWriter::new();
        writer.write_chunk(ChunkType::Layout, &[1, 2, 3]);
        let data = writer.finish();
        assert_eq!(data, [1, 0, 0, 0, 1, 0, 0, 0, 1, 2, 3, 0]);

        let mut reader = ChunkReader::new(&data, "container");
        let (ty, content) = reader.read_chunk().unwrap();
        assert_eq!(ty, ChunkType::Layout as u32);
        assert_eq!(content, [1, 2, 3, 0]);
        assert!(reader.is_empty());
    }

    #[test]
    fn truncated_chunk() {
        let mut writer = ChunkWriter::new();
        writer.write_u32(ChunkType::Code as u32);
        writer.write_u32(4);
        writer.write_u32(0);
        let data = writer.finish();

        let mut reader = ChunkReader::new(&data, "container");
        assert_eq!(
            reader.read_chunk(),
            Err(ProgramError::Truncated {
                what: "container",
                offset: 8,
                needed: 16,
                available: 4
            })
        );
    }
}
