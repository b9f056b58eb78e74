use crate::bytecode::{ChunkReader, ChunkWriter};
use crate::{LayoutError, ProgramError};

/// Deepest nesting of arrays and structs accepted when decoding a layout.
pub const MAX_TYPE_DEPTH: usize = 64;

/// Scalar element types; every scalar occupies one 32 bit word.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ScalarType {
    Bool,
    Int,
    Uint,
    Float,
}

impl ScalarType {
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int => "int",
            ScalarType::Uint => "uint",
            ScalarType::Float => "float",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(ScalarType::Bool),
            "int" => Some(ScalarType::Int),
            "uint" => Some(ScalarType::Uint),
            "float" => Some(ScalarType::Float),
            _ => None,
        }
    }
}

/// Memory layout of a value stored in a constant buffer, register range or UAV element.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TypeLayout {
    pub name: String,
    /// Size in bytes.
    pub size: u32,
    pub kind: TypeKind,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Scalar(ScalarType),
    Vector(ScalarType, u32),
    Array(Box<TypeLayout>, u32),
    Struct(Vec<TypeField>),
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TypeField {
    pub name: String,
    pub semantic: String,
    /// Byte offset of the field from the start of the enclosing struct.
    pub offset: u32,
    pub ty: TypeLayout,
}

impl TypeLayout {
    pub fn void() -> Self {
        Self {
            name: "void".into(),
            size: 0,
            kind: TypeKind::Void,
        }
    }

    pub fn scalar(ty: ScalarType) -> Self {
        Self {
            name: ty.name().into(),
            size: 4,
            kind: TypeKind::Scalar(ty),
        }
    }

    pub fn vector(ty: ScalarType, n: u32) -> Self {
        Self {
            name: format!("{}{}", ty.name(), n),
            size: 4 * n,
            kind: TypeKind::Vector(ty, n),
        }
    }

    pub fn array(element: TypeLayout, len: u32) -> Self {
        Self {
            name: format!("{}[{}]", element.name, len),
            size: element.size * len,
            kind: TypeKind::Array(Box::new(element), len),
        }
    }

    /// Build a tightly packed struct; fields are laid out in declaration order.
    pub fn structure<S: Into<String>>(name: impl Into<String>, fields: impl IntoIterator<Item = (S, TypeLayout)>) -> Self {
        let mut offset = 0;
        let fields = fields
            .into_iter()
            .map(|(name, ty)| {
                let field = TypeField {
                    name: name.into(),
                    semantic: String::new(),
                    offset,
                    ty,
                };
                offset += field.ty.size;
                field
            })
            .collect();

        Self {
            name: name.into(),
            size: offset,
            kind: TypeKind::Struct(fields),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    /// Number of 32 bit words the value occupies.
    pub fn words(&self) -> u32 {
        self.size.div_ceil(4)
    }

    pub fn field(&self, name: &str) -> Option<&TypeField> {
        match &self.kind {
            TypeKind::Struct(fields) => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    /// Serialized as `size, length (-1 unless array), name, field count, fields...`;
    /// fields are `offset, size, semantic, name, type`, arrays append their element type.
    pub fn encode(&self, writer: &mut ChunkWriter) {
        writer.write_u32(self.size);
        match &self.kind {
            TypeKind::Array(_, len) => writer.write_i32(*len as i32),
            _ => writer.write_i32(-1),
        }
        writer.write_str(&self.name);

        match &self.kind {
            TypeKind::Struct(fields) => {
                writer.write_u32(fields.len() as u32);
                for field in fields {
                    writer.write_u32(field.offset);
                    writer.write_u32(field.ty.size);
                    writer.write_str(&field.semantic);
                    writer.write_str(&field.name);
                    field.ty.encode(writer);
                }
            }
            TypeKind::Array(element, _) => {
                writer.write_u32(0);
                element.encode(writer);
            }
            _ => writer.write_u32(0),
        }
    }

    pub fn decode(reader: &mut ChunkReader) -> Result<Self, ProgramError> {
        Self::decode_nested(reader, 0)
    }

    fn decode_nested(reader: &mut ChunkReader, depth: usize) -> Result<Self, ProgramError> {
        if depth >= MAX_TYPE_DEPTH {
            return Err(LayoutError::TooDeep(MAX_TYPE_DEPTH).into());
        }

        let size = reader.read_u32()?;
        let length = reader.read_i32()?;
        let name = reader.read_str()?;
        let num_fields = reader.read_u32()?;

        let mut fields = Vec::new();
        for _ in 0..num_fields {
            let offset = reader.read_u32()?;
            let _size = reader.read_u32()?;
            let semantic = reader.read_str()?;
            let name = reader.read_str()?;
            let ty = TypeLayout::decode_nested(reader, depth + 1)?;
            fields.push(TypeField {
                name,
                semantic,
                offset,
                ty,
            });
        }

        let kind = if length >= 0 {
            TypeKind::Array(Box::new(TypeLayout::decode_nested(reader, depth + 1)?), length as u32)
        } else if !fields.is_empty() {
            TypeKind::Struct(fields)
        } else if name == "void" {
            TypeKind::Void
        } else if let Some(scalar) = ScalarType::from_name(&name) {
            TypeKind::Scalar(scalar)
        } else {
            parse_vector(&name).ok_or_else(|| LayoutError::UnknownType(name.clone()))?
        };

        let layout = Self { name, size, kind };
        layout.check_size()?;
        Ok(layout)
    }

    /// Reject a declared size that cannot hold the contents of the type.
    fn check_size(&self) -> Result<(), LayoutError> {
        let expected = match &self.kind {
            TypeKind::Void => 0,
            TypeKind::Scalar(_) => 4,
            TypeKind::Vector(_, n) => 4 * u64::from(*n),
            TypeKind::Array(element, _) if element.size == 0 => {
                return Err(LayoutError::EmptyElement(self.name.clone()));
            }
            TypeKind::Array(element, len) => u64::from(element.size) * u64::from(*len),
            TypeKind::Struct(fields) => {
                for field in fields {
                    if u64::from(field.offset) + u64::from(field.ty.size) > u64::from(self.size) {
                        return Err(LayoutError::FieldOutOfRange {
                            ty: self.name.clone(),
                            field: field.name.clone(),
                            size: self.size,
                        });
                    }
                }
                return Ok(());
            }
        };

        if u64::from(self.size) != expected {
            return Err(LayoutError::InvalidSize {
                ty: self.name.clone(),
                size: self.size,
                expected,
            });
        }
        Ok(())
    }
}

impl TypeKind {
    /// Element type of a scalar or vector.
    pub fn scalar(&self) -> Option<ScalarType> {
        match self {
            TypeKind::Scalar(ty) | TypeKind::Vector(ty, _) => Some(*ty),
            _ => None,
        }
    }
}

fn parse_vector(name: &str) -> Option<TypeKind> {
    let n = name.chars().last()?.to_digit(10).filter(|n| (1..=4).contains(n))?;
    let scalar = ScalarType::from_name(&name[..name.len() - 1])?;
    Some(TypeKind::Vector(scalar, n))
}

/// Size in bytes of a host type as laid out in vm memory.
pub fn sizeof<T: FxType>() -> u32 {
    T::layout().size
}

/// A dynamically typed host value, decoded from vm memory using a [`TypeLayout`].
#[derive(Clone, Debug, PartialEq)]
pub enum Native {
    Void,
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
    Array(Vec<Native>),
    Struct(Vec<(String, Native)>),
}

impl Native {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Native::Void => "void",
            Native::Bool(_) => "bool",
            Native::Int(_) => "int",
            Native::Uint(_) => "uint",
            Native::Float(_) => "float",
            Native::Array(_) => "array",
            Native::Struct(_) => "struct",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Native::Bool(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Native::Int(x) => Some(x),
            Native::Uint(x) => Some(x as i32),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Native::Uint(x) => Some(x),
            Native::Int(x) => Some(x as u32),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Native::Float(x) => Some(x),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Native> {
        match self {
            Native::Struct(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Decode a value from the start of `bytes`.
    pub fn decode(bytes: &[u8], layout: &TypeLayout) -> Result<Self, LayoutError> {
        if bytes.len() < layout.size as usize {
            return Err(LayoutError::ShortBuffer {
                ty: layout.name.clone(),
                needed: layout.size as usize,
                available: bytes.len(),
            });
        }

        let short = |needed: usize| LayoutError::ShortBuffer {
            ty: layout.name.clone(),
            needed,
            available: bytes.len(),
        };
        let tail = |offset: usize| bytes.get(offset..).ok_or_else(|| short(offset));

        Ok(match &layout.kind {
            TypeKind::Void => Native::Void,
            TypeKind::Scalar(ty) => decode_scalar(bytes, *ty).ok_or_else(|| short(4))?,
            TypeKind::Vector(ty, n) => Native::Array(
                (0..*n as usize)
                    .map(|i| decode_scalar(tail(i * 4)?, *ty).ok_or_else(|| short(i * 4 + 4)))
                    .collect::<Result<_, _>>()?,
            ),
            TypeKind::Array(element, len) => Native::Array(
                (0..*len as usize)
                    .map(|i| Native::decode(tail(i * element.size as usize)?, element))
                    .collect::<Result<_, _>>()?,
            ),
            TypeKind::Struct(fields) => Native::Struct(
                fields
                    .iter()
                    .map(|f| Native::decode(tail(f.offset as usize)?, &f.ty).map(|v| (f.name.clone(), v)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Encode the value into the start of `bytes`.
    ///
    /// `Int` and `Uint` are accepted interchangeably, other kinds must match the layout exactly.
    pub fn encode(&self, layout: &TypeLayout, bytes: &mut [u8]) -> Result<(), LayoutError> {
        if bytes.len() < layout.size as usize {
            return Err(LayoutError::ShortBuffer {
                ty: layout.name.clone(),
                needed: layout.size as usize,
                available: bytes.len(),
            });
        }

        let mismatch = || LayoutError::Mismatch {
            expected: layout.name.clone(),
            found: self.kind_name(),
        };
        let short = |needed: usize, available: usize| LayoutError::ShortBuffer {
            ty: layout.name.clone(),
            needed,
            available,
        };
        let available = bytes.len();

        match (&layout.kind, self) {
            (TypeKind::Void, Native::Void) => {}
            (TypeKind::Scalar(ty), value) => {
                let word = encode_scalar(value, *ty).ok_or_else(mismatch)?;
                let out = bytes.get_mut(..4).ok_or_else(|| short(4, available))?;
                out.copy_from_slice(&word.to_le_bytes());
            }
            (TypeKind::Vector(ty, n), Native::Array(values)) if values.len() == *n as usize => {
                for (i, value) in values.iter().enumerate() {
                    let word = encode_scalar(value, *ty).ok_or_else(mismatch)?;
                    let out = bytes.get_mut(i * 4..i * 4 + 4).ok_or_else(|| short(i * 4 + 4, available))?;
                    out.copy_from_slice(&word.to_le_bytes());
                }
            }
            (TypeKind::Array(element, len), Native::Array(values)) if values.len() == *len as usize => {
                for (i, value) in values.iter().enumerate() {
                    let offset = i * element.size as usize;
                    let out = bytes.get_mut(offset..).ok_or_else(|| short(offset, available))?;
                    value.encode(element, out)?;
                }
            }
            (TypeKind::Struct(fields), Native::Struct(values)) => {
                for field in fields {
                    let value = values
                        .iter()
                        .find(|(name, _)| *name == field.name)
                        .map(|(_, value)| value)
                        .ok_or_else(mismatch)?;
                    let offset = field.offset as usize;
                    let out = bytes.get_mut(offset..).ok_or_else(|| short(offset, available))?;
                    value.encode(&field.ty, out)?;
                }
            }
            _ => return Err(mismatch()),
        }

        Ok(())
    }
}

fn decode_scalar(bytes: &[u8], ty: ScalarType) -> Option<Native> {
    let word = u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?);
    Some(match ty {
        ScalarType::Bool => Native::Bool(word != 0),
        ScalarType::Int => Native::Int(word as i32),
        ScalarType::Uint => Native::Uint(word),
        ScalarType::Float => Native::Float(f32::from_bits(word)),
    })
}

fn encode_scalar(value: &Native, ty: ScalarType) -> Option<u32> {
    match (ty, value) {
        (ScalarType::Bool, Native::Bool(x)) => Some(*x as u32),
        (ScalarType::Int | ScalarType::Uint, Native::Int(x)) => Some(*x as u32),
        (ScalarType::Int | ScalarType::Uint, Native::Uint(x)) => Some(*x),
        (ScalarType::Float, Native::Float(x)) => Some(x.to_bits()),
        _ => None,
    }
}

impl From<bool> for Native {
    fn from(value: bool) -> Self {
        Native::Bool(value)
    }
}

impl From<i32> for Native {
    fn from(value: i32) -> Self {
        Native::Int(value)
    }
}

impl From<u32> for Native {
    fn from(value: u32) -> Self {
        Native::Uint(value)
    }
}

impl From<f32> for Native {
    fn from(value: f32) -> Self {
        Native::Float(value)
    }
}

/// Read the little endian word at byte `offset`.
///
/// Panics if `bytes` is shorter than `offset + 4`.
pub fn read_word(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

/// Write a little endian word at byte `offset`.
///
/// Panics if `bytes` is shorter than `offset + 4`.
pub fn write_word(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// A host type with a fixed vm memory layout.
///
/// Implemented for the scalar types and arrays of them; use `#[derive(FxType)]` for structs.
/// `read` and `write` expect a slice at least [`sizeof`] bytes long and panic otherwise.
pub trait FxType: Sized {
    fn layout() -> TypeLayout;
    fn read(bytes: &[u8]) -> Self;
    fn write(&self, bytes: &mut [u8]);
}

impl FxType for bool {
    fn layout() -> TypeLayout {
        TypeLayout::scalar(ScalarType::Bool)
    }

    fn read(bytes: &[u8]) -> Self {
        read_word(bytes, 0) != 0
    }

    fn write(&self, bytes: &mut [u8]) {
        write_word(bytes, 0, *self as u32);
    }
}

impl FxType for i32 {
    fn layout() -> TypeLayout {
        TypeLayout::scalar(ScalarType::Int)
    }

    fn read(bytes: &[u8]) -> Self {
        read_word(bytes, 0) as i32
    }

    fn write(&self, bytes: &mut [u8]) {
        write_word(bytes, 0, *self as u32);
    }
}

impl FxType for u32 {
    fn layout() -> TypeLayout {
        TypeLayout::scalar(ScalarType::Uint)
    }

    fn read(bytes: &[u8]) -> Self {
        read_word(bytes, 0)
    }

    fn write(&self, bytes: &mut [u8]) {
        write_word(bytes, 0, *self);
    }
}

impl FxType for f32 {
    fn layout() -> TypeLayout {
        TypeLayout::scalar(ScalarType::Float)
    }

    fn read(bytes: &[u8]) -> Self {
        f32::from_bits(read_word(bytes, 0))
    }

    fn write(&self, bytes: &mut [u8]) {
        write_word(bytes, 0, self.to_bits());
    }
}

impl<T: FxType, const N: usize> FxType for [T; N] {
    fn layout() -> TypeLayout {
        let element = T::layout();
        match element.kind {
            TypeKind::Scalar(ty) if (2..=4).contains(&N) => TypeLayout::vector(ty, N as u32),
            _ => TypeLayout::array(element, N as u32),
        }
    }

    fn read(bytes: &[u8]) -> Self {
        let size = sizeof::<T>() as usize;
        std::array::from_fn(|i| T::read(&bytes[i * size..]))
    }

    fn write(&self, bytes: &mut [u8]) {
        let size = sizeof::<T>() as usize;
        for (i, x) in self.iter().enumerate() {
            x.write(&mut bytes[i * size..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle() -> TypeLayout {
        TypeLayout::structure(
            "Part",
            [
                ("pos", TypeLayout::vector(ScalarType::Float, 3)),
                ("timelife", TypeLayout::scalar(ScalarType::Float)),
                ("id", TypeLayout::scalar(ScalarType::Int)),
            ],
        )
    }

    #[test]
    fn struct_offsets() {
        let layout = particle();
        assert_eq!(layout.size, 20);
        assert_eq!(layout.field("timelife").map(|f| f.offset), Some(12));
        assert_eq!(layout.field("id").map(|f| f.offset), Some(16));
        assert_eq!(layout.words(), 5);
    }

    #[test]
    fn layout_wire_format() {
        let layout = TypeLayout::structure(
            "Wrapper",
            [
                ("part", particle()),
                ("history", TypeLayout::array(TypeLayout::scalar(ScalarType::Uint), 4)),
            ],
        );

        let mut writer = ChunkWriter::new();
        layout.encode(&mut writer);
        let data = writer.finish();

        let mut reader = ChunkReader::new(&data, "layout");
        assert_eq!(TypeLayout::decode(&mut reader), Ok(layout));
        assert!(reader.is_empty());
    }

    #[test]
    fn unknown_type_name() {
        let mut writer = ChunkWriter::new();
        writer.write_u32(4);
        writer.write_i32(-1);
        writer.write_str("half");
        writer.write_u32(0);
        let data = writer.finish();

        assert_eq!(
            TypeLayout::decode(&mut ChunkReader::new(&data, "layout")),
            Err(ProgramError::Layout(LayoutError::UnknownType("half".into())))
        );
    }

    #[test]
    fn native_struct() {
        let layout = particle();
        let value = Native::Struct(vec![
            ("pos".into(), Native::Array(vec![Native::Float(1.0), Native::Float(2.0), Native::Float(3.0)])),
            ("timelife".into(), Native::Float(0.5)),
            ("id".into(), Native::Int(-7)),
        ]);

        let mut bytes = [0u8; 20];
        value.encode(&layout, &mut bytes).unwrap();
        assert_eq!(read_word(&bytes, 16) as i32, -7);

        let decoded = Native::decode(&bytes, &layout).unwrap();
        assert_eq!(decoded.field("timelife"), Some(&Native::Float(0.5)));
        assert_eq!(decoded, value);
    }

    #[test]
    fn native_mismatch() {
        let mut bytes = [0u8; 4];
        assert_eq!(
            Native::Float(1.0).encode(&TypeLayout::scalar(ScalarType::Int), &mut bytes),
            Err(LayoutError::Mismatch {
                expected: "int".into(),
                found: "float"
            })
        );
        assert!(Native::Int(3).encode(&TypeLayout::scalar(ScalarType::Uint), &mut bytes).is_ok());
    }

    #[test]
    fn native_short_buffer() {
        assert_eq!(
            Native::decode(&[0, 0], &TypeLayout::scalar(ScalarType::Float)),
            Err(LayoutError::ShortBuffer {
                ty: "float".into(),
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn declared_size_must_match_contents() {
        let float = TypeLayout {
            size: 0,
            ..TypeLayout::scalar(ScalarType::Float)
        };
        let mut writer = ChunkWriter::new();
        float.encode(&mut writer);
        let data = writer.finish();
        assert_eq!(
            TypeLayout::decode(&mut ChunkReader::new(&data, "layout")),
            Err(ProgramError::Layout(LayoutError::InvalidSize {
                ty: "float".into(),
                size: 0,
                expected: 4
            }))
        );

        let mut part = particle();
        part.size = 16;
        let mut writer = ChunkWriter::new();
        part.encode(&mut writer);
        let data = writer.finish();
        assert_eq!(
            TypeLayout::decode(&mut ChunkReader::new(&data, "layout")),
            Err(ProgramError::Layout(LayoutError::FieldOutOfRange {
                ty: "Part".into(),
                field: "id".into(),
                size: 16
            }))
        );

        let voids = TypeLayout::array(TypeLayout::void(), 1 << 30);
        let mut writer = ChunkWriter::new();
        voids.encode(&mut writer);
        let data = writer.finish();
        assert_eq!(
            TypeLayout::decode(&mut ChunkReader::new(&data, "layout")),
            Err(ProgramError::Layout(LayoutError::EmptyElement(voids.name.clone())))
        );
    }

    #[test]
    fn nesting_is_limited() {
        let nested = |depth: usize| {
            (0..depth).fold(TypeLayout::scalar(ScalarType::Int), |ty, _| TypeLayout::array(ty, 1))
        };

        let mut writer = ChunkWriter::new();
        nested(8).encode(&mut writer);
        let data = writer.finish();
        assert_eq!(TypeLayout::decode(&mut ChunkReader::new(&data, "layout")), Ok(nested(8)));

        let mut writer = ChunkWriter::new();
        nested(1000).encode(&mut writer);
        let data = writer.finish();
        assert_eq!(
            TypeLayout::decode(&mut ChunkReader::new(&data, "layout")),
            Err(ProgramError::Layout(LayoutError::TooDeep(MAX_TYPE_DEPTH)))
        );
    }

    #[test]
    fn inconsistent_layouts_do_not_panic() {
        let float = TypeLayout {
            size: 0,
            ..TypeLayout::scalar(ScalarType::Float)
        };
        assert_eq!(
            Native::decode(&[], &float),
            Err(LayoutError::ShortBuffer {
                ty: "float".into(),
                needed: 4,
                available: 0
            })
        );
        assert!(Native::Float(1.0).encode(&float, &mut []).is_err());

        let mut part = particle();
        part.size = 8;
        assert!(Native::decode(&[0; 8], &part).is_err());
    }

    #[test]
    fn fx_type_arrays() {
        assert_eq!(<[f32; 3]>::layout(), TypeLayout::vector(ScalarType::Float, 3));
        assert_eq!(sizeof::<[[i32; 2]; 5]>(), 40);

        let mut bytes = [0u8; 12];
        [1.5f32, -2.0, 8.0].write(&mut bytes);
        assert_eq!(<[f32; 3]>::read(&bytes), [1.5, -2.0, 8.0]);
    }
}
