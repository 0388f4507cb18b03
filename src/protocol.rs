//! Shared wire constants of the Java Object Serialization Stream Protocol
//! (JOSS 6.4.2 terminal symbols) plus type-name helpers.
//!
//! Die Namenskonventionen sind zweigleisig: Feld-Signaturen verwenden die
//! JVM-Deskriptor-Form mit Slashes (`Ljava/lang/String;`), Deskriptor- und
//! Interface-Namen die `Class.getName()`-Form mit Punkten (`java.util.HashMap`,
//! Arrays als `[I` / `[Ljava.lang.String;`).

/// First two stream bytes (JOSS 6.4.2 STREAM_MAGIC).
pub const STREAM_MAGIC: u16 = 0xACED;
/// Stream version, always 5 since JDK 1.2 (JOSS 6.4.2 STREAM_VERSION).
pub const STREAM_VERSION: u16 = 0x0005;

pub const TC_NULL: u8 = 0x70;
pub const TC_REFERENCE: u8 = 0x71;
pub const TC_CLASSDESC: u8 = 0x72;
pub const TC_OBJECT: u8 = 0x73;
pub const TC_STRING: u8 = 0x74;
pub const TC_ARRAY: u8 = 0x75;
pub const TC_CLASS: u8 = 0x76;
pub const TC_BLOCKDATA: u8 = 0x77;
pub const TC_ENDBLOCKDATA: u8 = 0x78;
pub const TC_RESET: u8 = 0x79;
pub const TC_BLOCKDATALONG: u8 = 0x7A;
pub const TC_EXCEPTION: u8 = 0x7B;
pub const TC_LONGSTRING: u8 = 0x7C;
pub const TC_PROXYCLASSDESC: u8 = 0x7D;
pub const TC_ENUM: u8 = 0x7E;

/// Wire handles start here; handle = `BASE_WIRE_HANDLE` + assignment index
/// (JOSS 6.4.3 baseWireHandle).
pub const BASE_WIRE_HANDLE: u32 = 0x7E_0000;

/// classDescFlags (JOSS 6.4.2).
pub const SC_WRITE_METHOD: u8 = 0x01;
pub const SC_SERIALIZABLE: u8 = 0x02;
pub const SC_EXTERNALIZABLE: u8 = 0x04;
pub const SC_BLOCK_DATA: u8 = 0x08;
pub const SC_ENUM: u8 = 0x10;

/// Human-readable tag name for error messages and the disassembly script.
pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        TC_NULL => "TC_NULL",
        TC_REFERENCE => "TC_REFERENCE",
        TC_CLASSDESC => "TC_CLASSDESC",
        TC_OBJECT => "TC_OBJECT",
        TC_STRING => "TC_STRING",
        TC_ARRAY => "TC_ARRAY",
        TC_CLASS => "TC_CLASS",
        TC_BLOCKDATA => "TC_BLOCKDATA",
        TC_ENDBLOCKDATA => "TC_ENDBLOCKDATA",
        TC_RESET => "TC_RESET",
        TC_BLOCKDATALONG => "TC_BLOCKDATALONG",
        TC_EXCEPTION => "TC_EXCEPTION",
        TC_LONGSTRING => "TC_LONGSTRING",
        TC_PROXYCLASSDESC => "TC_PROXYCLASSDESC",
        TC_ENUM => "TC_ENUM",
        _ => "unknown",
    }
}

/// Renders a classDescFlags byte as `SC_*` names joined with `|`.
/// Unknown bits are appended in hex.
pub fn flag_names(flags: u8) -> String {
    let mut parts = Vec::new();
    if flags & SC_WRITE_METHOD != 0 {
        parts.push("WRITE_METHOD".to_string());
    }
    if flags & SC_SERIALIZABLE != 0 {
        parts.push("SERIALIZABLE".to_string());
    }
    if flags & SC_EXTERNALIZABLE != 0 {
        parts.push("EXTERNALIZABLE".to_string());
    }
    if flags & SC_BLOCK_DATA != 0 {
        parts.push("BLOCK_DATA".to_string());
    }
    if flags & SC_ENUM != 0 {
        parts.push("ENUM".to_string());
    }
    let rest = flags & !(SC_WRITE_METHOD | SC_SERIALIZABLE | SC_EXTERNALIZABLE | SC_BLOCK_DATA | SC_ENUM);
    if rest != 0 || parts.is_empty() {
        parts.push(format!("{rest:#04x}"));
    }
    parts.join("|")
}

/// The eight Java primitive types (JOSS 6.4.2 prim_typecode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl PrimitiveType {
    /// Wire type code (`B`, `C`, `D`, `F`, `I`, `J`, `S`, `Z`).
    pub fn code(self) -> u8 {
        match self {
            Self::Byte => b'B',
            Self::Char => b'C',
            Self::Double => b'D',
            Self::Float => b'F',
            Self::Int => b'I',
            Self::Long => b'J',
            Self::Short => b'S',
            Self::Boolean => b'Z',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'B' => Some(Self::Byte),
            b'C' => Some(Self::Char),
            b'D' => Some(Self::Double),
            b'F' => Some(Self::Float),
            b'I' => Some(Self::Int),
            b'J' => Some(Self::Long),
            b'S' => Some(Self::Short),
            b'Z' => Some(Self::Boolean),
            _ => None,
        }
    }

    /// Java source keyword for the type.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Double => "double",
            Self::Float => "float",
            Self::Int => "int",
            Self::Long => "long",
            Self::Short => "short",
            Self::Boolean => "boolean",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "byte" => Some(Self::Byte),
            "char" => Some(Self::Char),
            "double" => Some(Self::Double),
            "float" => Some(Self::Float),
            "int" => Some(Self::Int),
            "long" => Some(Self::Long),
            "short" => Some(Self::Short),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    /// Unpadded value width in bytes on the wire.
    pub fn width(self) -> usize {
        match self {
            Self::Byte | Self::Boolean => 1,
            Self::Char | Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }
}

/// A primitive array's element values, typed per JOSS 6.4.2 prim_typecode.
/// Java `char` is a UTF-16 code unit, kept as `u16`.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveArray {
    Boolean(Vec<bool>),
    Byte(Vec<i8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl PrimitiveArray {
    pub fn element_type(&self) -> PrimitiveType {
        match self {
            Self::Boolean(_) => PrimitiveType::Boolean,
            Self::Byte(_) => PrimitiveType::Byte,
            Self::Char(_) => PrimitiveType::Char,
            Self::Short(_) => PrimitiveType::Short,
            Self::Int(_) => PrimitiveType::Int,
            Self::Long(_) => PrimitiveType::Long,
            Self::Float(_) => PrimitiveType::Float,
            Self::Double(_) => PrimitiveType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(v) => v.len(),
            Self::Byte(v) => v.len(),
            Self::Char(v) => v.len(),
            Self::Short(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Converts a source-style type name to the JVM field descriptor used in
/// field signature strings: dots become slashes, one `[` per dimension.
///
/// `"java.lang.String[]"` → `"[Ljava/lang/String;"`, `"int"` → `"I"`.
pub fn field_signature(type_name: &str) -> String {
    let (elem, dims) = strip_array_suffix(type_name);
    let mut sig = "[".repeat(dims);
    match PrimitiveType::from_type_name(elem) {
        Some(p) => sig.push(p.code() as char),
        None => {
            sig.push('L');
            sig.push_str(&elem.replace('.', "/"));
            sig.push(';');
        }
    }
    sig
}

/// Converts a source-style type name to the `Class.getName()` form used for
/// descriptor names and proxy interface names. Unlike field signatures the
/// dots are kept: `"int[][]"` → `"[[I"`, `"java.lang.String[]"` →
/// `"[Ljava.lang.String;"`, non-arrays pass through unchanged.
pub fn class_binary_name(type_name: &str) -> String {
    let (elem, dims) = strip_array_suffix(type_name);
    if dims == 0 {
        return type_name.to_string();
    }
    let mut name = "[".repeat(dims);
    match PrimitiveType::from_type_name(elem) {
        Some(p) => name.push(p.code() as char),
        None => {
            name.push('L');
            name.push_str(elem);
            name.push(';');
        }
    }
    name
}

/// Inverse of [`field_signature`] for the disassembly script:
/// `"[Ljava/lang/String;"` → `"java.lang.String[]"`. `None` when malformed.
pub fn signature_type_name(signature: &str) -> Option<String> {
    let dims = signature.bytes().take_while(|&b| b == b'[').count();
    let elem = &signature[dims..];
    let base = match elem.as_bytes().first()? {
        b'L' => {
            let inner = elem.strip_prefix('L')?.strip_suffix(';')?;
            if inner.is_empty() {
                return None;
            }
            inner.replace('/', ".")
        }
        &code => {
            if elem.len() != 1 {
                return None;
            }
            PrimitiveType::from_code(code)?.type_name().to_string()
        }
    };
    Some(base + &"[]".repeat(dims))
}

fn strip_array_suffix(type_name: &str) -> (&str, usize) {
    let mut elem = type_name;
    let mut dims = 0;
    while let Some(stripped) = elem.strip_suffix("[]") {
        elem = stripped;
        dims += 1;
    }
    (elem, dims)
}
