use crate::bytecode::{ChunkReader, ChunkType, ChunkWriter, INSTRUCTION_WORDS, VMOp};
use crate::layout::{ScalarType, TypeLayout};
use crate::{Dim3, LayoutError, ProgramError};

/// A named value in the program's constant buffer (`b0`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantReflection {
    pub name: String,
    pub semantic: String,
    pub ty: TypeLayout,
    /// Byte offset inside the constant buffer.
    pub offset: u32,
    pub size: u32,
}

/// An unordered access resource the program expects at `u{register}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UavReflection {
    pub name: String,
    pub register: u32,
    pub stride: u32,
    pub ty: TypeLayout,
}

/// A host function the program may invoke with [`VMOp::Call`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternReflection {
    pub id: u32,
    pub name: String,
    pub ret: TypeLayout,
    pub params: Vec<TypeLayout>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reflection {
    pub constants: Vec<ConstantReflection>,
    pub uavs: Vec<UavReflection>,
    pub externs: Vec<ExternReflection>,
    pub numthreads: Dim3,
    /// Type of the value left in registers `0..` when the program returns.
    pub result: TypeLayout,
}

impl Default for Reflection {
    fn default() -> Self {
        Self {
            constants: Vec::new(),
            uavs: Vec::new(),
            externs: Vec::new(),
            numthreads: Dim3::ONE,
            result: TypeLayout::void(),
        }
    }
}

/// A compiled routine: instruction stream, initial constant buffer and reflection.
///
/// Programs are immutable once built and are shared between bundles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    code: Vec<VMOp>,
    constants: Vec<u8>,
    reflection: Reflection,
}

impl Program {
    pub fn new(code: Vec<VMOp>, constants: Vec<u8>, reflection: Reflection) -> Self {
        Self {
            code,
            constants,
            reflection,
        }
    }

    pub fn code(&self) -> &[VMOp] {
        &self.code
    }

    /// Initial contents of the constant buffer.
    pub fn constants(&self) -> &[u8] {
        &self.constants
    }

    pub fn reflection(&self) -> &Reflection {
        &self.reflection
    }

    pub fn numthreads(&self) -> Dim3 {
        self.reflection.numthreads
    }

    pub fn result(&self) -> &TypeLayout {
        &self.reflection.result
    }

    pub fn constant(&self, name: &str) -> Option<&ConstantReflection> {
        self.reflection.constants.iter().find(|c| c.name == name)
    }

    pub fn uav(&self, name: &str) -> Option<&UavReflection> {
        self.reflection.uavs.iter().find(|u| u.name == name)
    }

    pub fn extern_fn(&self, name: &str) -> Option<&ExternReflection> {
        self.reflection.externs.iter().find(|e| e.name == name)
    }

    /// Serialize into the chunked little endian container format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = ChunkWriter::new();

        let mut chunk = ChunkWriter::new();
        chunk.write_u32(self.reflection.constants.len() as u32);
        for constant in self.reflection.constants.iter() {
            chunk.write_str(&constant.name);
            chunk.write_str(&constant.ty.name);
            chunk.write_str(&constant.semantic);
            chunk.write_u32(constant.offset);
            chunk.write_u32(constant.size);
        }
        out.write_chunk(ChunkType::Layout, &chunk.finish());

        out.write_chunk(ChunkType::Constants, &self.constants);

        let mut chunk = ChunkWriter::new();
        chunk.write_u32(self.reflection.externs.len() as u32);
        for ext in self.reflection.externs.iter() {
            chunk.write_u32(ext.id);
            chunk.write_str(&ext.name);
            ext.ret.encode(&mut chunk);
            chunk.write_u32(ext.params.len() as u32);
            for param in ext.params.iter() {
                param.encode(&mut chunk);
            }
        }
        out.write_chunk(ChunkType::Externs, &chunk.finish());

        let mut chunk = ChunkWriter::new();
        chunk.write_u32(self.reflection.uavs.len() as u32);
        for uav in self.reflection.uavs.iter() {
            chunk.write_str(&uav.name);
            chunk.write_u32(uav.register);
            chunk.write_u32(uav.stride);
            uav.ty.encode(&mut chunk);
        }
        out.write_chunk(ChunkType::Uavs, &chunk.finish());

        let mut chunk = ChunkWriter::new();
        for x in <[u32; 3]>::from(self.reflection.numthreads) {
            chunk.write_u32(x);
        }
        out.write_chunk(ChunkType::Numthreads, &chunk.finish());

        let mut chunk = ChunkWriter::new();
        self.reflection.result.encode(&mut chunk);
        out.write_chunk(ChunkType::Result, &chunk.finish());

        let mut chunk = ChunkWriter::new();
        for op in self.code.iter() {
            for word in op.encode() {
                chunk.write_u32(word);
            }
        }
        out.write_chunk(ChunkType::Code, &chunk.finish());

        out.finish()
    }

    /// Parse a container produced by [`Program::encode`] or an external compiler.
    ///
    /// Unknown chunks are skipped; the code chunk is mandatory.
    pub fn decode(data: &[u8]) -> Result<Self, ProgramError> {
        let mut reader = ChunkReader::new(data, "container");
        let mut code = None;
        let mut constants = Vec::new();
        let mut reflection = Reflection::default();

        while !reader.is_empty() {
            let (ty, content) = reader.read_chunk()?;
            match ChunkType::from_u32(ty) {
                Some(ChunkType::Code) => code = Some(decode_code(content)?),
                Some(ChunkType::Constants) => constants = content.to_vec(),
                Some(ChunkType::Layout) => reflection.constants = decode_layout(content)?,
                Some(ChunkType::Externs) => reflection.externs = decode_externs(content)?,
                Some(ChunkType::Uavs) => reflection.uavs = decode_uavs(content)?,
                Some(ChunkType::Numthreads) => {
                    let mut chunk = ChunkReader::new(content, "numthreads chunk");
                    reflection.numthreads = Dim3::new(chunk.read_u32()?, chunk.read_u32()?, chunk.read_u32()?);
                }
                Some(ChunkType::Result) => {
                    reflection.result = TypeLayout::decode(&mut ChunkReader::new(content, "result chunk"))?;
                }
                None => {}
            }
        }

        let code = code.ok_or(ProgramError::MissingChunk(ChunkType::Code))?;
        check_constants(&reflection.constants, constants.len())?;
        Ok(Self::new(code, constants, reflection))
    }
}

/// Every constant must fit its type and lie inside the constant buffer.
fn check_constants(constants: &[ConstantReflection], available: usize) -> Result<(), ProgramError> {
    for constant in constants {
        if constant.size != constant.ty.size {
            return Err(ProgramError::ConstantSize {
                name: constant.name.clone(),
                expected: constant.ty.size,
                found: constant.size,
            });
        }

        let end = u64::from(constant.offset) + u64::from(constant.size);
        if end > available as u64 {
            return Err(ProgramError::ConstantOutOfRange {
                name: constant.name.clone(),
                offset: constant.offset,
                end,
                available,
            });
        }
    }
    Ok(())
}

fn decode_code(content: &[u8]) -> Result<Vec<VMOp>, ProgramError> {
    const INSTRUCTION_BYTES: usize = INSTRUCTION_WORDS * 4;

    if content.len() % INSTRUCTION_BYTES != 0 {
        return Err(ProgramError::MisalignedCode(content.len()));
    }

    let mut reader = ChunkReader::new(content, "code chunk");
    let mut code = Vec::with_capacity(content.len() / INSTRUCTION_BYTES);
    while !reader.is_empty() {
        let mut words = [0; INSTRUCTION_WORDS];
        for word in words.iter_mut() {
            *word = reader.read_u32()?;
        }

        let op = VMOp::decode(words).ok_or(ProgramError::InvalidOpcode {
            pc: code.len(),
            opcode: words[0],
        })?;
        code.push(op);
    }

    Ok(code)
}

fn decode_layout(content: &[u8]) -> Result<Vec<ConstantReflection>, ProgramError> {
    let mut reader = ChunkReader::new(content, "layout chunk");
    let count = reader.read_u32()?;
    (0..count)
        .map(|_| -> Result<_, ProgramError> {
            let name = reader.read_str()?;
            let ty = reader.read_str()?;
            let semantic = reader.read_str()?;
            let offset = reader.read_u32()?;
            let size = reader.read_u32()?;
            Ok(ConstantReflection {
                name,
                semantic,
                ty: constant_type(&ty, size)?,
                offset,
                size,
            })
        })
        .collect()
}

/// Constants are scalars or short vectors, described only by their type name.
fn constant_type(name: &str, size: u32) -> Result<TypeLayout, LayoutError> {
    if let Some(scalar) = ScalarType::from_name(name) {
        return Ok(TypeLayout::scalar(scalar));
    }

    let n = size / 4;
    match ScalarType::from_name(name.trim_end_matches(|c: char| c.is_ascii_digit())) {
        Some(scalar) if (2..=4).contains(&n) && name == TypeLayout::vector(scalar, n).name => {
            Ok(TypeLayout::vector(scalar, n))
        }
        _ => Err(LayoutError::UnknownType(name.to_string())),
    }
}

fn decode_externs(content: &[u8]) -> Result<Vec<ExternReflection>, ProgramError> {
    let mut reader = ChunkReader::new(content, "externs chunk");
    let count = reader.read_u32()?;
    (0..count)
        .map(|_| -> Result<_, ProgramError> {
            let id = reader.read_u32()?;
            let name = reader.read_str()?;
            let ret = TypeLayout::decode(&mut reader)?;
            let num_params = reader.read_u32()?;
            let params = (0..num_params)
                .map(|_| TypeLayout::decode(&mut reader))
                .collect::<Result<_, _>>()?;
            if id >= count {
                return Err(ProgramError::ExternId { id, count });
            }
            Ok(ExternReflection { id, name, ret, params })
        })
        .collect()
}

fn decode_uavs(content: &[u8]) -> Result<Vec<UavReflection>, ProgramError> {
    let mut reader = ChunkReader::new(content, "uavs chunk");
    let count = reader.read_u32()?;
    (0..count)
        .map(|_| -> Result<_, ProgramError> {
            let name = reader.read_str()?;
            let register = reader.read_u32()?;
            let stride = reader.read_u32()?;
            let ty = TypeLayout::decode(&mut reader)?;
            Ok(UavReflection { name, register, stride, ty })
        })
        .collect()
}
