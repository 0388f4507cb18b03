//! Class descriptor builders (JOSS 6.4.2 classDesc / classDescInfo).
//!
//! Eine Kette wird most-derived zuerst deklariert und mit TC_NULL (oder
//! einer Rückreferenz) terminiert; danach bekommt das Element selbst den
//! nächsten Handle-Index. Die Feldtabelle wird gesammelt und erst am Ende
//! geschrieben, weil der u16-Feldzähler auf dem Draht vor den Einträgen
//! steht.

use crate::encoder::StreamWriter;
use crate::handle::Handle;
use crate::protocol::{
    self, PrimitiveType, BASE_WIRE_HANDLE, SC_SERIALIZABLE, TC_CLASSDESC, TC_ENDBLOCKDATA,
    TC_NULL, TC_PROXYCLASSDESC, TC_REFERENCE,
};
use crate::{Error, Result};

/// Scope of one descriptor chain, created by the object/class/array/enum
/// builders.
pub struct DescriptorsWriter<'a> {
    w: &'a mut StreamWriter,
    post_chain: Handle,
    enum_chain: bool,
    terminated: bool,
}

impl<'a> DescriptorsWriter<'a> {
    pub(crate) fn new(w: &'a mut StreamWriter, post_chain: Handle, enum_chain: bool) -> Self {
        Self { w, post_chain, enum_chain, terminated: false }
    }

    /// One plain descriptor (TC_CLASSDESC), handle auto-allocated.
    pub fn desc<F>(&mut self, f: F) -> Result<()>
    where
        F: for<'b> FnOnce(&mut DescriptorWriter<'b>) -> Result<()>,
    {
        self.desc_with(&Handle::new(), f)
    }

    /// One plain descriptor bound to `handle`. The descriptor's index is
    /// assigned here, before any field-signature strings inside.
    pub fn desc_with<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'b> FnOnce(&mut DescriptorWriter<'b>) -> Result<()>,
    {
        assert!(!self.terminated, "descriptor chain already terminated");
        self.w.alloc().assign(handle)?;
        self.w.defer(|out| {
            out.write_u8(TC_CLASSDESC);
            Ok(())
        })?;
        let mut d = DescriptorWriter {
            w: &mut *self.w,
            enum_desc: self.enum_chain,
            name: None,
            uid: None,
            flags: SC_SERIALIZABLE,
            fields: Vec::new(),
        };
        f(&mut d)?;
        d.end()
    }

    /// A dynamic proxy descriptor (TC_PROXYCLASSDESC): interface count and
    /// names, nothing else. The implicit `java.lang.reflect.Proxy`
    /// superclass descriptor is NOT emitted; declare it as the next chain
    /// entry.
    pub fn proxy(&mut self, interfaces: &[&str]) -> Result<()> {
        self.proxy_with(&Handle::new(), interfaces)
    }

    pub fn proxy_with(&mut self, handle: &Handle, interfaces: &[&str]) -> Result<()> {
        assert!(!self.terminated, "descriptor chain already terminated");
        for name in interfaces {
            if name.starts_with('[')
                || name.ends_with("[]")
                || PrimitiveType::from_type_name(name).is_some()
            {
                return Err(Error::NotAnInterface((*name).to_string()));
            }
        }
        self.w.alloc().assign(handle)?;
        let names: Vec<String> = interfaces.iter().map(|s| (*s).to_string()).collect();
        self.w.defer(move |out| {
            out.write_u8(TC_PROXYCLASSDESC);
            out.write_i32(names.len() as i32);
            for name in &names {
                out.write_utf(name)?;
            }
            out.set_block_mode(true)?;
            out.set_block_mode(false)?;
            out.write_u8(TC_ENDBLOCKDATA);
            Ok(())
        })
    }

    /// Terminates the chain with a back reference to an earlier descriptor
    /// instead of TC_NULL; that descriptor brings its own superclass chain.
    pub fn back_ref(&mut self, handle: &Handle) -> Result<()> {
        assert!(!self.terminated, "descriptor chain already terminated");
        let index = self.w.alloc().resolve(handle)?;
        self.terminated = true;
        self.w.defer(move |out| {
            out.write_u8(TC_REFERENCE);
            out.write_u32(BASE_WIRE_HANDLE + index);
            Ok(())
        })
    }

    /// Chain end: TC_NULL terminator unless back-referenced, then the
    /// element the chain belongs to gets the next index.
    pub(crate) fn finish(&mut self) -> Result<()> {
        if !self.terminated {
            self.w.defer(|out| {
                out.write_u8(TC_NULL);
                Ok(())
            })?;
        }
        self.w.alloc().assign(&self.post_chain)?;
        Ok(())
    }
}

enum FieldEntry {
    Primitive { code: u8, name: String },
    Inline { name: String, signature: String },
    BackRef { name: String, code: u8, index: u32 },
}

/// Scope of one plain descriptor: name, uid, flags and the field table.
pub struct DescriptorWriter<'a> {
    w: &'a mut StreamWriter,
    enum_desc: bool,
    name: Option<String>,
    uid: Option<i64>,
    flags: u8,
    fields: Vec<FieldEntry>,
}

impl DescriptorWriter<'_> {
    /// The class name in source form or `Class.getName()` form; arrays may
    /// be written either way (`"int[]"` or `"[I"`).
    pub fn type_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    /// Explicit serialVersionUID. Without it the registry is consulted at
    /// the end of the descriptor.
    pub fn uid(&mut self, uid: i64) {
        self.uid = Some(uid);
    }

    /// classDescFlags, default SC_SERIALIZABLE.
    pub fn flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    /// Declares a field, classified by its type name.
    pub fn field(&mut self, name: &str, type_name: &str) -> Result<()> {
        if PrimitiveType::from_type_name(type_name).is_some() {
            self.primitive_field(name, type_name)
        } else {
            self.object_field(name, type_name)
        }
    }

    pub fn primitive_field(&mut self, name: &str, type_name: &str) -> Result<()> {
        let prim = PrimitiveType::from_type_name(type_name)
            .ok_or_else(|| Error::NotAPrimitiveType(type_name.to_string()))?;
        self.fields.push(FieldEntry::Primitive { code: prim.code(), name: name.to_string() });
        Ok(())
    }

    /// An object or array field with an inline signature string. The
    /// signature is written later inside the field table, but it consumes
    /// the allocator's next index NOW: on the wire it is a real TC_STRING
    /// element, and readers assign its handle in declaration order.
    pub fn object_field(&mut self, name: &str, type_name: &str) -> Result<()> {
        let signature = self.object_signature(type_name)?;
        self.w.alloc().alloc_index();
        self.fields.push(FieldEntry::Inline { name: name.to_string(), signature });
        Ok(())
    }

    /// Like [`object_field`](Self::object_field), binding the signature
    /// string's handle so later fields can back-reference it.
    pub fn object_field_with(&mut self, name: &str, type_name: &str, handle: &Handle) -> Result<()> {
        let signature = self.object_signature(type_name)?;
        self.w.alloc().assign(handle)?;
        self.fields.push(FieldEntry::Inline { name: name.to_string(), signature });
        Ok(())
    }

    /// An object field whose signature string is a back reference to an
    /// earlier string element. Consumes no index.
    pub fn object_field_ref(
        &mut self,
        name: &str,
        type_name: &str,
        signature_handle: &Handle,
    ) -> Result<()> {
        let signature = self.object_signature(type_name)?;
        let index = self.w.alloc().resolve(signature_handle)?;
        self.fields.push(FieldEntry::BackRef {
            name: name.to_string(),
            code: signature.as_bytes()[0],
            index,
        });
        Ok(())
    }

    fn object_signature(&self, type_name: &str) -> Result<String> {
        if PrimitiveType::from_type_name(type_name).is_some() {
            return Err(Error::NotAnObjectType(type_name.to_string()));
        }
        Ok(protocol::field_signature(type_name))
    }

    /// Writes the descriptor body: name, uid, flags, field table, empty
    /// annotation region, TC_ENDBLOCKDATA.
    fn end(self) -> Result<()> {
        let name = self.name.ok_or(Error::IncompleteConstruct("descriptor has no type name"))?;
        let uid = if self.enum_desc {
            // JOSS 6.4.2: enum descriptors always carry serialVersionUID 0.
            0
        } else {
            match self.uid {
                Some(uid) => uid,
                None => self
                    .w
                    .uid_for(&name)
                    .ok_or_else(|| Error::UnknownSerialUid(name.clone()))?,
            }
        };
        let wire_name = protocol::class_binary_name(&name);
        let flags = self.flags;
        let fields = self.fields;
        self.w.defer(move |out| {
            out.write_utf(&wire_name)?;
            out.write_i64(uid);
            out.write_u8(flags);
            out.write_u16(fields.len() as u16);
            for field in &fields {
                match field {
                    FieldEntry::Primitive { code, name } => {
                        out.write_u8(*code);
                        out.write_utf(name)?;
                    }
                    FieldEntry::Inline { name, signature } => {
                        out.write_u8(signature.as_bytes()[0]);
                        out.write_utf(name)?;
                        out.write_string(signature);
                    }
                    FieldEntry::BackRef { name, code, index } => {
                        out.write_u8(*code);
                        out.write_utf(name)?;
                        out.write_u8(TC_REFERENCE);
                        out.write_u32(BASE_WIRE_HANDLE + index);
                    }
                }
            }
            out.set_block_mode(true)?;
            out.set_block_mode(false)?;
            out.write_u8(TC_ENDBLOCKDATA);
            Ok(())
        })
    }
}
