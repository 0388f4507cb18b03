//! Stream disassembler: bytes in, structured construction trace out.
//!
//! Der Parser führt die Entity-Tabelle exakt in der Zuweisungsreihenfolge
//! des Encoders (JOSS 6.4.3): Deskriptoren beim TC_CLASSDESC-Tag, inline
//! geschriebene Feld-Signatur-Strings beim Lesen der Feldtabelle, das
//! Element selbst nach seiner Kette, Enum-Konstantennamen nach dem Enum.
//! Dadurch sind Handle-Indizes im Trace identisch mit denen, die ein
//! Replay über den Encoder wieder vergibt.

mod script;

pub use script::{reencode, render, replay};

use std::rc::Rc;

use crate::bytestream::ByteReader;
use crate::protocol::{
    tag_name, PrimitiveArray, PrimitiveType, BASE_WIRE_HANDLE, SC_BLOCK_DATA,
    SC_EXTERNALIZABLE, SC_SERIALIZABLE, SC_WRITE_METHOD, STREAM_MAGIC, STREAM_VERSION,
    TC_ARRAY, TC_BLOCKDATA, TC_BLOCKDATALONG, TC_CLASS, TC_CLASSDESC, TC_ENDBLOCKDATA,
    TC_ENUM, TC_EXCEPTION, TC_LONGSTRING, TC_NULL, TC_OBJECT, TC_PROXYCLASSDESC,
    TC_REFERENCE, TC_RESET, TC_STRING,
};
use crate::{Error, Result};


/// A disassembled stream: the top-level contents in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub contents: Vec<Content>,
}

/// One content element (JOSS 6.4.2 content). Indices are assignment
/// indices, not wire handles; the wire adds `BASE_WIRE_HANDLE`.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Null,
    Reference { index: u32 },
    Str { index: u32, value: String },
    BlockData(Vec<u8>),
    Object(ObjectInfo),
    Class(ClassInfo),
    Array(ArrayInfo),
    Enum(EnumInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub index: u32,
    /// Descriptor chain, most-derived first.
    pub chain: Vec<DescRef>,
    pub body: ObjectBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectBody {
    /// Per chain level, base class first (wire order of classdata).
    Fields(Vec<ClassDataEntry>),
    /// Externalizable protocol 2 data.
    External(Vec<Annotation>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDataEntry {
    pub values: Vec<FieldValue>,
    /// Custom writeObject data when the level has SC_WRITE_METHOD.
    pub annotation: Option<Vec<Annotation>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Prim(PrimValue),
    Obj(Content),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    Block(Vec<u8>),
    Content(Content),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub index: u32,
    pub chain: Vec<DescRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayInfo {
    pub index: u32,
    pub chain: Vec<DescRef>,
    pub elements: ArrayElements,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayElements {
    Primitive(PrimitiveArray),
    Object(Vec<Content>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumInfo {
    pub index: u32,
    pub chain: Vec<DescRef>,
    pub constant: String,
    /// Index of the constant-name string when written inline.
    pub constant_index: Option<u32>,
    /// Referenced string index when the constant was a back reference.
    pub constant_back: Option<u32>,
}

/// One chain entry.
#[derive(Debug, Clone, PartialEq)]
pub enum DescRef {
    Plain(PlainDesc),
    Proxy(ProxyDesc),
    /// Back reference to an earlier descriptor, which carries its own
    /// superclass chain; the local chain listing ends here.
    Back { index: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlainDesc {
    pub index: u32,
    /// `Class.getName()` form, arrays like `[I`.
    pub name: String,
    pub uid: i64,
    pub flags: u8,
    pub fields: Vec<FieldDesc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDesc {
    pub name: String,
    pub ty: FieldType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Primitive(PrimitiveType),
    Object {
        /// JVM descriptor form (`Ljava/lang/String;`), resolved through
        /// the entity table for back references.
        signature: String,
        /// Assignment index of an inline signature string.
        sig_index: Option<u32>,
        /// Referenced string index when the signature was a back reference.
        back: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyDesc {
    pub index: u32,
    pub interfaces: Vec<String>,
}

/// Deepest content/descriptor nesting the decoder follows. The grammar
/// itself is unbounded; past this a stream is hostile, not deep.
const MAX_NESTING: usize = 512;

/// Disassembles a stream (JOSS 6.4.2 stream := magic version contents).
pub fn decode(bytes: &[u8]) -> Result<Stream> {
    let mut d = Decoder { r: ByteReader::new(bytes), entities: Vec::new(), depth: 0 };
    let magic = d.r.read_u16("stream magic")?;
    if magic != STREAM_MAGIC {
        return Err(Error::BadMagic(magic));
    }
    let version = d.r.read_u16("stream version")?;
    if version != STREAM_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let mut contents = Vec::new();
    while !d.r.at_end() {
        contents.push(d.parse_content("content")?);
    }
    log::debug!(
        "decoded {} bytes: {} top-level contents, {} handles",
        bytes.len(),
        contents.len(),
        d.entities.len()
    );
    Ok(Stream { contents })
}

/// Parsed layout of a descriptor, linked to its superclass. Kept per
/// entity so back-referenced chains can still drive classdata parsing.
struct DescNode {
    layout: DescLayout,
    superclass: Option<Rc<DescNode>>,
}

struct DescLayout {
    name: String,
    flags: u8,
    fields: Vec<(String, FieldKind)>,
    proxy: bool,
}

#[derive(Clone, Copy)]
enum FieldKind {
    Prim(PrimitiveType),
    Obj,
}

enum Entity {
    Str(String),
    Desc(Rc<DescNode>),
    /// Object, array, enum constant or class object; referenceable but
    /// carrying no state the parser needs later.
    Opaque,
}

struct Decoder<'a> {
    r: ByteReader<'a>,
    entities: Vec<Entity>,
    depth: usize,
}

impl Decoder<'_> {
    fn new_index(&mut self, entity: Entity) -> u32 {
        self.entities.push(entity);
        (self.entities.len() - 1) as u32
    }

    /// Reads a wire handle and maps it back to an assignment index.
    fn read_reference(&mut self) -> Result<u32> {
        let offset = self.r.offset();
        let handle = self.r.read_u32("reference handle")?;
        let index = handle.wrapping_sub(BASE_WIRE_HANDLE);
        if handle < BASE_WIRE_HANDLE || index as usize >= self.entities.len() {
            return Err(Error::UnknownHandle { offset, handle });
        }
        Ok(index)
    }

    /// Bounds the recursion through nested contents and descriptor chains;
    /// the stack is finite, streams are not.
    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING {
            return Err(Error::NestingTooDeep { offset: self.r.offset(), limit: MAX_NESTING });
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_content(&mut self, expected: &'static str) -> Result<Content> {
        self.enter()?;
        let result = self.content_inner(expected);
        self.depth -= 1;
        result
    }

    fn content_inner(&mut self, expected: &'static str) -> Result<Content> {
        let offset = self.r.offset();
        let tag = self.r.read_u8(expected)?;
        log::trace!("{} at offset {offset}", tag_name(tag));
        match tag {
            TC_NULL => Ok(Content::Null),
            TC_REFERENCE => {
                let index = self.read_reference()?;
                Ok(Content::Reference { index })
            }
            TC_STRING | TC_LONGSTRING => {
                let value = self.read_string_body(tag)?;
                let index = self.new_index(Entity::Str(value.clone()));
                Ok(Content::Str { index, value })
            }
            TC_BLOCKDATA | TC_BLOCKDATALONG => {
                Ok(Content::BlockData(self.read_block_body(tag, offset)?))
            }
            TC_OBJECT => self.parse_object(),
            TC_CLASS => {
                let chain = self.parse_desc_chain()?.0;
                let index = self.new_index(Entity::Opaque);
                Ok(Content::Class(ClassInfo { index, chain }))
            }
            TC_ARRAY => self.parse_array(offset),
            TC_ENUM => self.parse_enum(),
            TC_RESET | TC_EXCEPTION => Err(Error::UnsupportedTag { offset, tag }),
            _ => Err(Error::UnexpectedTag { offset, tag, expected }),
        }
    }

    /// String body after the tag: u16 or u64 length + modified UTF-8.
    fn read_string_body(&mut self, tag: u8) -> Result<String> {
        let len = if tag == TC_STRING {
            usize::from(self.r.read_u16("string length")?)
        } else {
            let offset = self.r.offset();
            let len = self.r.read_i64("long string length")?;
            usize::try_from(len)
                .map_err(|_| Error::Truncated { offset, expected: "long string length" })?
        };
        let base = self.r.offset();
        let bytes = self.r.read_bytes(len, "string bytes")?;
        crate::mutf8::decode(bytes, base)
    }

    fn read_block_body(&mut self, tag: u8, offset: usize) -> Result<Vec<u8>> {
        let len = if tag == TC_BLOCKDATA {
            usize::from(self.r.read_u8("block data length")?)
        } else {
            let len = self.r.read_i32("block data length")?;
            usize::try_from(len)
                .map_err(|_| Error::Truncated { offset, expected: "block data length" })?
        };
        Ok(self.r.read_bytes(len, "block data")?.to_vec())
    }

    /// classDesc (JOSS 6.4.2): plain, proxy, null or back reference; each
    /// plain/proxy descriptor recursively carries its superclass.
    fn parse_desc_chain(&mut self) -> Result<(Vec<DescRef>, Option<Rc<DescNode>>)> {
        self.enter()?;
        let result = self.desc_chain_inner();
        self.depth -= 1;
        result
    }

    fn desc_chain_inner(&mut self) -> Result<(Vec<DescRef>, Option<Rc<DescNode>>)> {
        let offset = self.r.offset();
        let tag = self.r.read_u8("class descriptor")?;
        match tag {
            TC_NULL => Ok((Vec::new(), None)),
            TC_REFERENCE => {
                let handle_offset = self.r.offset();
                let index = self.read_reference()?;
                match &self.entities[index as usize] {
                    Entity::Desc(node) => {
                        Ok((vec![DescRef::Back { index }], Some(Rc::clone(node))))
                    }
                    // Assigned, but not a descriptor.
                    _ => Err(Error::UnknownHandle {
                        offset: handle_offset,
                        handle: BASE_WIRE_HANDLE + index,
                    }),
                }
            }
            TC_CLASSDESC => self.parse_plain_desc(),
            TC_PROXYCLASSDESC => self.parse_proxy_desc(),
            _ => Err(Error::UnexpectedTag { offset, tag, expected: "class descriptor" }),
        }
    }

    fn parse_plain_desc(&mut self) -> Result<(Vec<DescRef>, Option<Rc<DescNode>>)> {
        // The descriptor's index comes before its field-signature strings.
        let index = self.new_index(Entity::Opaque);
        let name = self.r.read_utf("class name")?;
        let uid = self.r.read_i64("serialVersionUID")?;
        let flags = self.r.read_u8("classDescFlags")?;
        let count = self.r.read_u16("field count")?;

        let mut fields = Vec::with_capacity(usize::from(count));
        let mut kinds = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let code_offset = self.r.offset();
            let code = self.r.read_u8("field type code")?;
            let field_name = self.r.read_utf("field name")?;
            if code == b'L' || code == b'[' {
                let (signature, sig_index, back) = self.read_field_signature()?;
                kinds.push((field_name.clone(), FieldKind::Obj));
                fields.push(FieldDesc {
                    name: field_name,
                    ty: FieldType::Object { signature, sig_index, back },
                });
            } else if let Some(prim) = PrimitiveType::from_code(code) {
                kinds.push((field_name.clone(), FieldKind::Prim(prim)));
                fields.push(FieldDesc { name: field_name, ty: FieldType::Primitive(prim) });
            } else {
                return Err(Error::UnexpectedTag {
                    offset: code_offset,
                    tag: code,
                    expected: "field type code",
                });
            }
        }

        self.expect_end_block_data("end of class annotation")?;
        let (mut chain, superclass) = self.parse_desc_chain()?;

        let node = Rc::new(DescNode {
            layout: DescLayout { name: name.clone(), flags, fields: kinds, proxy: false },
            superclass,
        });
        self.entities[index as usize] = Entity::Desc(Rc::clone(&node));
        chain.insert(0, DescRef::Plain(PlainDesc { index, name, uid, flags, fields }));
        Ok((chain, Some(node)))
    }

    fn parse_proxy_desc(&mut self) -> Result<(Vec<DescRef>, Option<Rc<DescNode>>)> {
        let index = self.new_index(Entity::Opaque);
        let count_offset = self.r.offset();
        let count = self.r.read_i32("proxy interface count")?;
        let count = usize::try_from(count)
            .map_err(|_| Error::Truncated { offset: count_offset, expected: "proxy interface count" })?;
        // Count is attacker-controlled; allocate as the names actually arrive.
        let mut interfaces = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let name = self.r.read_utf("proxy interface name")?;
            if name.starts_with('[') || PrimitiveType::from_type_name(&name).is_some() {
                return Err(Error::NotAnInterface(name));
            }
            interfaces.push(name);
        }
        self.expect_end_block_data("end of proxy annotation")?;
        let (mut chain, superclass) = self.parse_desc_chain()?;

        let node = Rc::new(DescNode {
            layout: DescLayout {
                name: String::new(),
                flags: SC_SERIALIZABLE,
                fields: Vec::new(),
                proxy: true,
            },
            superclass,
        });
        self.entities[index as usize] = Entity::Desc(Rc::clone(&node));
        chain.insert(0, DescRef::Proxy(ProxyDesc { index, interfaces }));
        Ok((chain, Some(node)))
    }

    /// The annotation region of a descriptor. The builder always leaves it
    /// empty; non-empty class annotations are not representable in the
    /// trace and rejected.
    fn expect_end_block_data(&mut self, expected: &'static str) -> Result<()> {
        let offset = self.r.offset();
        let tag = self.r.read_u8(expected)?;
        if tag != TC_ENDBLOCKDATA {
            return Err(Error::UnexpectedTag { offset, tag, expected });
        }
        Ok(())
    }

    /// Signature string inside a field table entry: an inline string
    /// element consuming the next index, or a back reference.
    fn read_field_signature(&mut self) -> Result<(String, Option<u32>, Option<u32>)> {
        let offset = self.r.offset();
        let tag = self.r.read_u8("field signature string")?;
        match tag {
            TC_STRING | TC_LONGSTRING => {
                let value = self.read_string_body(tag)?;
                let index = self.new_index(Entity::Str(value.clone()));
                Ok((value, Some(index), None))
            }
            TC_REFERENCE => {
                let handle_offset = self.r.offset();
                let index = self.read_reference()?;
                match &self.entities[index as usize] {
                    Entity::Str(value) => Ok((value.clone(), None, Some(index))),
                    _ => Err(Error::UnknownHandle {
                        offset: handle_offset,
                        handle: BASE_WIRE_HANDLE + index,
                    }),
                }
            }
            _ => Err(Error::UnexpectedTag { offset, tag, expected: "field signature string" }),
        }
    }

    fn parse_object(&mut self) -> Result<Content> {
        let (chain, head) = self.parse_desc_chain()?;
        let index = self.new_index(Entity::Opaque);

        let body = match &head {
            None => ObjectBody::Fields(Vec::new()),
            Some(node) if node.layout.flags & SC_EXTERNALIZABLE != 0 => {
                if node.layout.flags & SC_BLOCK_DATA == 0 {
                    return Err(Error::ExternalProtocol1 { offset: self.r.offset() });
                }
                ObjectBody::External(self.read_annotations()?)
            }
            Some(_) => {
                let mut entries = Vec::new();
                for node in layouts_base_first(&head) {
                    entries.push(self.read_class_data_entry(&node.layout)?);
                }
                ObjectBody::Fields(entries)
            }
        };
        Ok(Content::Object(ObjectInfo { index, chain, body }))
    }

    /// One chain level's classdata: field values in table order (primitives
    /// first, then objects, the `defaultWriteFields` layout), then the
    /// optional writeObject annotation.
    fn read_class_data_entry(&mut self, layout: &DescLayout) -> Result<ClassDataEntry> {
        let mut values = Vec::new();
        if layout.flags & SC_SERIALIZABLE != 0 {
            for (name, kind) in &layout.fields {
                if let FieldKind::Prim(prim) = kind {
                    let value = self.read_prim_value(*prim)?;
                    values.push(FieldValue { name: name.clone(), value: Value::Prim(value) });
                }
            }
            for (name, kind) in &layout.fields {
                if matches!(kind, FieldKind::Obj) {
                    let content = self.parse_content("object field value")?;
                    values.push(FieldValue { name: name.clone(), value: Value::Obj(content) });
                }
            }
        }
        let annotation = if layout.flags & SC_SERIALIZABLE != 0
            && layout.flags & SC_WRITE_METHOD != 0
        {
            Some(self.read_annotations()?)
        } else {
            None
        };
        Ok(ClassDataEntry { values, annotation })
    }

    fn read_prim_value(&mut self, prim: PrimitiveType) -> Result<PrimValue> {
        Ok(match prim {
            PrimitiveType::Boolean => PrimValue::Boolean(self.r.read_bool("boolean field value")?),
            PrimitiveType::Byte => PrimValue::Byte(self.r.read_u8("byte field value")? as i8),
            PrimitiveType::Char => PrimValue::Char(self.r.read_char("char field value")?),
            PrimitiveType::Short => PrimValue::Short(self.r.read_i16("short field value")?),
            PrimitiveType::Int => PrimValue::Int(self.r.read_i32("int field value")?),
            PrimitiveType::Long => PrimValue::Long(self.r.read_i64("long field value")?),
            PrimitiveType::Float => PrimValue::Float(self.r.read_f32("float field value")?),
            PrimitiveType::Double => PrimValue::Double(self.r.read_f64("double field value")?),
        })
    }

    /// Block-data chunks and nested contents up to TC_ENDBLOCKDATA.
    fn read_annotations(&mut self) -> Result<Vec<Annotation>> {
        let mut annotations = Vec::new();
        loop {
            let offset = self.r.offset();
            let tag = self.r.peek_u8("annotation")?;
            match tag {
                TC_ENDBLOCKDATA => {
                    self.r.read_u8("annotation")?;
                    return Ok(annotations);
                }
                TC_BLOCKDATA | TC_BLOCKDATALONG => {
                    self.r.read_u8("annotation")?;
                    annotations.push(Annotation::Block(self.read_block_body(tag, offset)?));
                }
                _ => annotations.push(Annotation::Content(self.parse_content("annotation content")?)),
            }
        }
    }

    fn parse_array(&mut self, tag_offset: usize) -> Result<Content> {
        let (chain, head) = self.parse_desc_chain()?;
        let index = self.new_index(Entity::Opaque);

        let name = match &head {
            Some(node) if !node.layout.proxy => node.layout.name.clone(),
            _ => String::new(),
        };
        let element = name.strip_prefix('[').ok_or_else(|| Error::NotAnArrayType {
            offset: tag_offset,
            name: name.clone(),
        })?;

        let count_offset = self.r.offset();
        let count = self.r.read_i32("array length")?;
        let count = usize::try_from(count)
            .map_err(|_| Error::Truncated { offset: count_offset, expected: "array length" })?;

        let first = element.as_bytes().first().copied();
        let elements = if element.len() == 1 {
            let prim = first.and_then(PrimitiveType::from_code).ok_or_else(|| {
                Error::NotAnArrayType { offset: tag_offset, name: name.clone() }
            })?;
            ArrayElements::Primitive(self.read_prim_array(prim, count)?)
        } else if matches!(first, Some(b'L') | Some(b'[')) {
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(self.parse_content("array element")?);
            }
            ArrayElements::Object(items)
        } else {
            return Err(Error::NotAnArrayType { offset: tag_offset, name });
        };
        Ok(Content::Array(ArrayInfo { index, chain, elements }))
    }

    fn read_prim_array(&mut self, prim: PrimitiveType, count: usize) -> Result<PrimitiveArray> {
        macro_rules! read_all {
            ($variant:ident, $read:ident, $label:literal) => {{
                let mut values = Vec::with_capacity(count.min(1 << 20));
                for _ in 0..count {
                    values.push(self.r.$read($label)?);
                }
                PrimitiveArray::$variant(values)
            }};
        }
        Ok(match prim {
            PrimitiveType::Boolean => read_all!(Boolean, read_bool, "boolean array element"),
            PrimitiveType::Byte => {
                let bytes = self.r.read_bytes(count, "byte array elements")?;
                PrimitiveArray::Byte(bytes.iter().map(|&b| b as i8).collect())
            }
            PrimitiveType::Char => read_all!(Char, read_char, "char array element"),
            PrimitiveType::Short => read_all!(Short, read_i16, "short array element"),
            PrimitiveType::Int => read_all!(Int, read_i32, "int array element"),
            PrimitiveType::Long => read_all!(Long, read_i64, "long array element"),
            PrimitiveType::Float => read_all!(Float, read_f32, "float array element"),
            PrimitiveType::Double => read_all!(Double, read_f64, "double array element"),
        })
    }

    fn parse_enum(&mut self) -> Result<Content> {
        let (chain, _head) = self.parse_desc_chain()?;
        let index = self.new_index(Entity::Opaque);

        let offset = self.r.offset();
        let tag = self.r.read_u8("enum constant name")?;
        let (constant, constant_index, constant_back) = match tag {
            TC_STRING | TC_LONGSTRING => {
                let value = self.read_string_body(tag)?;
                let name_index = self.new_index(Entity::Str(value.clone()));
                (value, Some(name_index), None)
            }
            TC_REFERENCE => {
                let handle_offset = self.r.offset();
                let target = self.read_reference()?;
                match &self.entities[target as usize] {
                    Entity::Str(value) => (value.clone(), None, Some(target)),
                    _ => {
                        return Err(Error::UnknownHandle {
                            offset: handle_offset,
                            handle: BASE_WIRE_HANDLE + target,
                        })
                    }
                }
            }
            _ => {
                return Err(Error::UnexpectedTag { offset, tag, expected: "enum constant name" })
            }
        };
        Ok(Content::Enum(EnumInfo { index, chain, constant, constant_index, constant_back }))
    }
}

/// Flattens a descriptor chain into base-first order for classdata.
fn layouts_base_first(head: &Option<Rc<DescNode>>) -> Vec<Rc<DescNode>> {
    let mut nodes = Vec::new();
    let mut cursor = head.clone();
    while let Some(node) = cursor {
        cursor = node.superclass.clone();
        nodes.push(node);
    }
    nodes.reverse();
    nodes
}
