//! Construction scripts from decoded traces.
//!
//! [`render`] formatiert einen Trace als lesbares Skript; [`replay`] fährt
//! dieselben Konstruktionsaufrufe gegen einen [`StreamWriter`], und
//! [`reencode`] macht daraus Bytes. Weil Parser und Encoder Handles in
//! derselben Reihenfolge vergeben, ist reencode(decode(bytes)) == bytes für
//! jeden Stream, den der Encoder selbst erzeugen kann.

use std::fmt::Write as _;

use crate::descriptor::DescriptorsWriter;
use crate::encoder::{ArrayWriter, DataWriter, ObjectWriter, StreamWriter, ValuesWriter};
use crate::handle::Handle;
use crate::protocol::{flag_names, signature_type_name, PrimitiveArray, SC_ENUM};
use crate::{Error, FastHashMap, Result};

use super::{
    Annotation, ArrayElements, ArrayInfo, ClassDataEntry, Content, DescRef, EnumInfo,
    FieldType, FieldValue, ObjectBody, ObjectInfo, PlainDesc, PrimValue, Stream, Value,
};

/// Formats a trace as a construction script, one content element per
/// top-level block, 2-space indent.
pub fn render(stream: &Stream) -> String {
    let mut r = Renderer { out: String::new(), indent: 0 };
    for content in &stream.contents {
        r.content("", content);
    }
    r.out
}

/// Drives the construction calls of a trace against `w`.
///
/// Handles are recreated per assignment index, so all back references
/// resolve as in the source stream. Fails with
/// [`Error::UnsupportedReplay`] for the few wire shapes the builder cannot
/// express (a back-referenced enum constant name, block data among field
/// values).
pub fn replay(stream: &Stream, w: &mut StreamWriter) -> Result<()> {
    let mut replayer = Replayer { handles: FastHashMap::default() };
    for content in &stream.contents {
        replayer.content(w, content)?;
    }
    Ok(())
}

/// decode → bytes again; byte-identical for encoder-produced streams.
pub fn reencode(stream: &Stream) -> Result<Vec<u8>> {
    let mut w = StreamWriter::new();
    replay(stream, &mut w)?;
    w.finish()
}

// --- rendering ---

struct Renderer {
    out: String,
    indent: usize,
}

impl Renderer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn open(&mut self, text: &str) {
        self.line(text);
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent -= 1;
        self.line("}");
    }

    /// One content element. `prefix` carries a `name = ` binding when the
    /// element is an object field value.
    fn content(&mut self, prefix: &str, content: &Content) {
        match content {
            Content::Null => self.line(&format!("{prefix}null")),
            Content::Reference { index } => self.line(&format!("{prefix}ref h{index}")),
            Content::Str { index, value } => {
                self.line(&format!("{prefix}string h{index} \"{}\"", escape(value)));
            }
            Content::BlockData(bytes) => {
                self.line(&format!("{prefix}block [{}]", hex_bytes(bytes)));
            }
            Content::Object(info) => self.object(prefix, info),
            Content::Class(info) => {
                self.open(&format!("{prefix}class h{} {{", info.index));
                self.chain(&info.chain);
                self.close();
            }
            Content::Array(info) => self.array(prefix, info),
            Content::Enum(info) => self.enum_const(prefix, info),
        }
    }

    fn object(&mut self, prefix: &str, info: &ObjectInfo) {
        self.open(&format!("{prefix}object h{} {{", info.index));
        self.chain(&info.chain);
        match &info.body {
            ObjectBody::Fields(entries) => {
                for entry in entries {
                    self.class_data_entry(entry);
                }
            }
            ObjectBody::External(annotations) => {
                self.annotations("writeExternal", annotations);
            }
        }
        self.close();
    }

    fn class_data_entry(&mut self, entry: &ClassDataEntry) {
        if !entry.values.is_empty() {
            self.open("values {");
            for fv in &entry.values {
                self.field_value(fv);
            }
            self.close();
        }
        if let Some(annotations) = &entry.annotation {
            self.annotations("writeObject", annotations);
        }
    }

    fn field_value(&mut self, fv: &FieldValue) {
        match &fv.value {
            Value::Prim(prim) => {
                let (keyword, literal) = prim_literal(prim);
                self.line(&format!("{keyword} {} = {literal}", fv.name));
            }
            Value::Obj(content) => {
                let prefix = format!("{} = ", fv.name);
                self.content(&prefix, content);
            }
        }
    }

    fn annotations(&mut self, label: &str, annotations: &[Annotation]) {
        if annotations.is_empty() {
            self.line(&format!("{label} {{}}"));
            return;
        }
        self.open(&format!("{label} {{"));
        for annotation in annotations {
            match annotation {
                Annotation::Block(bytes) => {
                    self.line(&format!("block [{}]", hex_bytes(bytes)));
                }
                Annotation::Content(content) => self.content("", content),
            }
        }
        self.close();
    }

    fn array(&mut self, prefix: &str, info: &ArrayInfo) {
        self.open(&format!("{prefix}array h{} {{", info.index));
        self.chain(&info.chain);
        match &info.elements {
            ArrayElements::Primitive(values) => {
                self.line(&format!(
                    "elements {} [{}]",
                    values.element_type().type_name(),
                    prim_array_literals(values)
                ));
            }
            ArrayElements::Object(items) if items.is_empty() => self.line("elements {}"),
            ArrayElements::Object(items) => {
                self.open("elements {");
                for item in items {
                    self.content("", item);
                }
                self.close();
            }
        }
        self.close();
    }

    fn enum_const(&mut self, prefix: &str, info: &EnumInfo) {
        self.open(&format!("{prefix}enum h{} {{", info.index));
        self.chain(&info.chain);
        let constant = escape(&info.constant);
        match (info.constant_index, info.constant_back) {
            (Some(index), _) => self.line(&format!("constant h{index} \"{constant}\"")),
            (None, Some(back)) => self.line(&format!("constant ref h{back} \"{constant}\"")),
            (None, None) => self.line(&format!("constant \"{constant}\"")),
        }
        self.close();
    }

    fn chain(&mut self, chain: &[DescRef]) {
        for entry in chain {
            match entry {
                DescRef::Plain(desc) => self.plain_desc(desc),
                DescRef::Proxy(proxy) => {
                    let names: Vec<String> =
                        proxy.interfaces.iter().map(|n| format!("\"{}\"", escape(n))).collect();
                    self.line(&format!(
                        "proxy h{} interfaces=[{}]",
                        proxy.index,
                        names.join(", ")
                    ));
                }
                DescRef::Back { index } => self.line(&format!("desc ref h{index}")),
            }
        }
    }

    fn plain_desc(&mut self, desc: &PlainDesc) {
        let mut head = format!("desc h{} name=\"{}\"", desc.index, escape(&desc.name));
        if desc.flags & SC_ENUM == 0 {
            // Enum descriptors always carry uid 0; not worth printing.
            let _ = write!(head, " uid={}", desc.uid);
        }
        let _ = write!(head, " flags={}", flag_names(desc.flags));
        if desc.fields.is_empty() {
            self.line(&format!("{head} {{}}"));
            return;
        }
        self.open(&format!("{head} {{"));
        for field in &desc.fields {
            match &field.ty {
                FieldType::Primitive(prim) => {
                    self.line(&format!("field {}: {}", field.name, prim.type_name()));
                }
                FieldType::Object { signature, sig_index, back } => {
                    let type_name = signature_type_name(signature)
                        .unwrap_or_else(|| signature.clone());
                    match (sig_index, back) {
                        (Some(index), _) => self.line(&format!(
                            "field {}: {type_name} h{index}",
                            field.name
                        )),
                        (None, Some(back)) => self.line(&format!(
                            "field {}: {type_name} ref h{back}",
                            field.name
                        )),
                        (None, None) => {
                            self.line(&format!("field {}: {type_name}", field.name))
                        }
                    }
                }
            }
        }
        self.close();
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{{{:04X}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

fn char_literal(v: u16) -> String {
    if (0x20..0x7F).contains(&v) && v != u16::from(b'\'') && v != u16::from(b'\\') {
        format!("'{}'", v as u8 as char)
    } else {
        format!("0x{v:04X}")
    }
}

fn prim_literal(prim: &PrimValue) -> (&'static str, String) {
    match prim {
        PrimValue::Boolean(v) => ("boolean", v.to_string()),
        PrimValue::Byte(v) => ("byte", v.to_string()),
        PrimValue::Char(v) => ("char", char_literal(*v)),
        PrimValue::Short(v) => ("short", v.to_string()),
        PrimValue::Int(v) => ("int", v.to_string()),
        PrimValue::Long(v) => ("long", v.to_string()),
        PrimValue::Float(v) => ("float", format!("{v:?}")),
        PrimValue::Double(v) => ("double", format!("{v:?}")),
    }
}

fn prim_array_literals(values: &PrimitiveArray) -> String {
    fn join<T, F: Fn(&T) -> String>(items: &[T], f: F) -> String {
        items.iter().map(f).collect::<Vec<_>>().join(", ")
    }
    match values {
        PrimitiveArray::Boolean(v) => join(v, |x| x.to_string()),
        PrimitiveArray::Byte(v) => join(v, |x| x.to_string()),
        PrimitiveArray::Char(v) => join(v, |x| char_literal(*x)),
        PrimitiveArray::Short(v) => join(v, |x| x.to_string()),
        PrimitiveArray::Int(v) => join(v, |x| x.to_string()),
        PrimitiveArray::Long(v) => join(v, |x| x.to_string()),
        PrimitiveArray::Float(v) => join(v, |x| format!("{x:?}")),
        PrimitiveArray::Double(v) => join(v, |x| format!("{x:?}")),
    }
}

// --- replay ---

/// The construct surface shared by the stream top level, field values and
/// custom data blocks. Replay drives whichever scope it is in through this.
trait ContentSink {
    fn put_object<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ObjectWriter<'a>) -> Result<()>;

    fn put_class<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>;

    fn put_array<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ArrayWriter<'a>) -> Result<()>;

    fn put_enum<F>(&mut self, name: &str, handle: &Handle, name_handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>;

    fn put_string(&mut self, s: &str, handle: &Handle) -> Result<()>;
    fn put_null(&mut self) -> Result<()>;
    fn put_reference(&mut self, handle: &Handle) -> Result<()>;
    fn put_block(&mut self, bytes: &[u8]) -> Result<()>;
}

impl ContentSink for StreamWriter {
    fn put_object<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ObjectWriter<'a>) -> Result<()>,
    {
        self.object(handle, f)
    }

    fn put_class<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        self.class(handle, f)
    }

    fn put_array<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ArrayWriter<'a>) -> Result<()>,
    {
        self.array(handle, f)
    }

    fn put_enum<F>(&mut self, name: &str, handle: &Handle, name_handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        self.enum_const_with(name, handle, name_handle, f)
    }

    fn put_string(&mut self, s: &str, handle: &Handle) -> Result<()> {
        self.string_with(s, handle)
    }

    fn put_null(&mut self) -> Result<()> {
        self.null()
    }

    fn put_reference(&mut self, handle: &Handle) -> Result<()> {
        self.reference(handle)
    }

    fn put_block(&mut self, bytes: &[u8]) -> Result<()> {
        self.block_data(bytes)
    }
}

impl ContentSink for ValuesWriter<'_> {
    fn put_object<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ObjectWriter<'a>) -> Result<()>,
    {
        self.object(handle, f)
    }

    fn put_class<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        self.class(handle, f)
    }

    fn put_array<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ArrayWriter<'a>) -> Result<()>,
    {
        self.array(handle, f)
    }

    fn put_enum<F>(&mut self, name: &str, handle: &Handle, name_handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        self.enum_const_with(name, handle, name_handle, f)
    }

    fn put_string(&mut self, s: &str, handle: &Handle) -> Result<()> {
        self.string_with(s, handle)
    }

    fn put_null(&mut self) -> Result<()> {
        self.null()
    }

    fn put_reference(&mut self, handle: &Handle) -> Result<()> {
        self.reference(handle)
    }

    fn put_block(&mut self, _bytes: &[u8]) -> Result<()> {
        Err(Error::UnsupportedReplay("block data among field values"))
    }
}

impl ContentSink for DataWriter<'_> {
    fn put_object<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ObjectWriter<'a>) -> Result<()>,
    {
        self.object(handle, f)
    }

    fn put_class<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        self.class(handle, f)
    }

    fn put_array<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ArrayWriter<'a>) -> Result<()>,
    {
        self.array(handle, f)
    }

    fn put_enum<F>(&mut self, name: &str, handle: &Handle, name_handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        self.enum_const_with(name, handle, name_handle, f)
    }

    fn put_string(&mut self, s: &str, handle: &Handle) -> Result<()> {
        self.string_with(s, handle)
    }

    fn put_null(&mut self) -> Result<()> {
        self.null()
    }

    fn put_reference(&mut self, handle: &Handle) -> Result<()> {
        self.reference(handle)
    }

    fn put_block(&mut self, bytes: &[u8]) -> Result<()> {
        // Inside a data block the bytes join the current chunk.
        self.bytes(bytes)
    }
}

struct Replayer {
    /// Assignment index → shared handle; created on first sight, assigned
    /// by the declaring construct.
    handles: FastHashMap<u32, Handle>,
}

impl Replayer {
    fn handle_for(&mut self, index: u32) -> Handle {
        self.handles.entry(index).or_default().clone()
    }

    fn content<S: ContentSink>(&mut self, sink: &mut S, content: &Content) -> Result<()> {
        match content {
            Content::Null => sink.put_null(),
            Content::Reference { index } => {
                let handle = self.handle_for(*index);
                sink.put_reference(&handle)
            }
            Content::Str { index, value } => {
                let handle = self.handle_for(*index);
                sink.put_string(value, &handle)
            }
            Content::BlockData(bytes) => sink.put_block(bytes),
            Content::Object(info) => {
                let handle = self.handle_for(info.index);
                sink.put_object(&handle, |o| self.object(o, info))
            }
            Content::Class(info) => {
                let handle = self.handle_for(info.index);
                sink.put_class(&handle, |descs| self.chain(descs, &info.chain))
            }
            Content::Array(info) => {
                let handle = self.handle_for(info.index);
                sink.put_array(&handle, |a| self.array(a, info))
            }
            Content::Enum(info) => {
                let name_handle = match (info.constant_index, info.constant_back) {
                    (Some(index), _) => self.handle_for(index),
                    _ => {
                        return Err(Error::UnsupportedReplay(
                            "enum constant name is a back reference",
                        ))
                    }
                };
                let handle = self.handle_for(info.index);
                sink.put_enum(&info.constant, &handle, &name_handle, |descs| {
                    self.chain(descs, &info.chain)
                })
            }
        }
    }

    fn object(&mut self, o: &mut ObjectWriter<'_>, info: &ObjectInfo) -> Result<()> {
        o.descriptors(|descs| self.chain(descs, &info.chain))?;
        match &info.body {
            ObjectBody::Fields(entries) => {
                for entry in entries {
                    if !entry.values.is_empty() {
                        o.values(|v| self.values(v, &entry.values))?;
                    }
                    if let Some(annotations) = &entry.annotation {
                        o.write_object(|d| self.annotations(d, annotations))?;
                    }
                }
                Ok(())
            }
            ObjectBody::External(annotations) => {
                o.write_external(|d| self.annotations(d, annotations))
            }
        }
    }

    fn array(&mut self, a: &mut ArrayWriter<'_>, info: &ArrayInfo) -> Result<()> {
        a.descriptors(|descs| self.chain(descs, &info.chain))?;
        match &info.elements {
            ArrayElements::Primitive(values) => a.primitive_elements(values),
            ArrayElements::Object(items) => a.elements(|v| {
                for item in items {
                    self.content(v, item)?;
                }
                Ok(())
            }),
        }
    }

    fn values(&mut self, v: &mut ValuesWriter<'_>, values: &[FieldValue]) -> Result<()> {
        for fv in values {
            match &fv.value {
                Value::Prim(PrimValue::Boolean(x)) => v.boolean(*x)?,
                Value::Prim(PrimValue::Byte(x)) => v.byte(*x)?,
                Value::Prim(PrimValue::Char(x)) => v.char(*x)?,
                Value::Prim(PrimValue::Short(x)) => v.short(*x)?,
                Value::Prim(PrimValue::Int(x)) => v.int(*x)?,
                Value::Prim(PrimValue::Long(x)) => v.long(*x)?,
                Value::Prim(PrimValue::Float(x)) => v.float(*x)?,
                Value::Prim(PrimValue::Double(x)) => v.double(*x)?,
                Value::Obj(content) => self.content(v, content)?,
            }
        }
        Ok(())
    }

    fn annotations(&mut self, d: &mut DataWriter<'_>, annotations: &[Annotation]) -> Result<()> {
        for annotation in annotations {
            match annotation {
                Annotation::Block(bytes) => d.bytes(bytes)?,
                Annotation::Content(content) => self.content(d, content)?,
            }
        }
        Ok(())
    }

    fn chain(&mut self, descs: &mut DescriptorsWriter<'_>, chain: &[DescRef]) -> Result<()> {
        for entry in chain {
            match entry {
                DescRef::Plain(desc) => {
                    let handle = self.handle_for(desc.index);
                    let result: Result<()> = descs.desc_with(&handle, |d| {
                        d.type_name(&desc.name);
                        d.uid(desc.uid);
                        d.flags(desc.flags);
                        for field in &desc.fields {
                            match &field.ty {
                                FieldType::Primitive(prim) => {
                                    d.primitive_field(&field.name, prim.type_name())?;
                                }
                                FieldType::Object { signature, sig_index, back } => {
                                    let type_name =
                                        signature_type_name(signature).ok_or(
                                            Error::UnsupportedReplay(
                                                "malformed field signature",
                                            ),
                                        )?;
                                    match (sig_index, back) {
                                        (Some(index), _) => {
                                            let sig_handle = self.handle_for(*index);
                                            d.object_field_with(
                                                &field.name,
                                                &type_name,
                                                &sig_handle,
                                            )?;
                                        }
                                        (None, Some(back)) => {
                                            let sig_handle = self.handle_for(*back);
                                            d.object_field_ref(
                                                &field.name,
                                                &type_name,
                                                &sig_handle,
                                            )?;
                                        }
                                        (None, None) => {
                                            return Err(Error::UnsupportedReplay(
                                                "field signature has no source element",
                                            ))
                                        }
                                    }
                                }
                            }
                        }
                        Ok(())
                    });
                    result?;
                }
                DescRef::Proxy(proxy) => {
                    let handle = self.handle_for(proxy.index);
                    let names: Vec<&str> =
                        proxy.interfaces.iter().map(String::as_str).collect();
                    descs.proxy_with(&handle, &names)?;
                }
                DescRef::Back { index } => {
                    let handle = self.handle_for(*index);
                    descs.back_ref(&handle)?;
                }
            }
        }
        Ok(())
    }
}
