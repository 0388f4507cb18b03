//! Stream graph encoder (JOSS 6.1, 6.4.2 grammar: stream, contents).
//!
//! [`StreamWriter`] owns the byte sink, the handle allocator and the uid
//! registry. Constructs are built through scoped builder structs handed
//! `&mut` into caller closures; the scope cannot escape its closure, so the
//! grammar nesting is enforced by the borrow checker.
//!
//! Array-Element-Batches machen die Sache asynchron: die i32-Elementanzahl
//! steht auf dem Draht VOR den Elementen, wird aber erst beim Schließen des
//! `elements`-Blocks bekannt. Deshalb läuft jede Byte-Ausgabe durch
//! [`StreamWriter::defer`]: direkt ausgeführt, oder in den innersten offenen
//! Batch eingereiht. Handle-Vergabe passiert dagegen immer sofort bei der
//! Deklaration, damit die Indizes die Deklarationsreihenfolge abbilden.

use std::cell::Cell;
use std::rc::Rc;

use crate::bytestream::ByteWriter;
use crate::descriptor::DescriptorsWriter;
use crate::handle::{Handle, HandleAllocator};
use crate::protocol::{
    PrimitiveArray, BASE_WIRE_HANDLE, STREAM_MAGIC, STREAM_VERSION, TC_ARRAY, TC_CLASS,
    TC_ENDBLOCKDATA, TC_ENUM, TC_NULL, TC_OBJECT, TC_REFERENCE,
};
use crate::uid::UidRegistry;
use crate::Result;

#[cfg(test)]
mod tests;

type Action = Box<dyn FnOnce(&mut ByteWriter) -> Result<()>>;

/// Encoder for one serialization stream. Writes magic and version on
/// creation; [`finish`](Self::finish) yields the bytes.
pub struct StreamWriter {
    out: ByteWriter,
    handles: HandleAllocator,
    uids: UidRegistry,
    /// Construct nesting depth, for the data-block guard.
    depth: usize,
    /// One entry per open construct that may contain an `elements` batch
    /// (`None`), or per open batch itself (`Some(count)`).
    element_counts: Vec<Option<u32>>,
    /// Queued actions of open `elements` batches, innermost last.
    deferred: Vec<Vec<Action>>,
}

impl StreamWriter {
    /// A writer with the well-known JDK uid table preloaded.
    pub fn new() -> Self {
        Self::with_registry(UidRegistry::with_known())
    }

    pub fn with_registry(uids: UidRegistry) -> Self {
        let mut out = ByteWriter::new();
        out.write_u16(STREAM_MAGIC);
        out.write_u16(STREAM_VERSION);
        Self {
            out,
            handles: HandleAllocator::new(),
            uids,
            depth: 0,
            element_counts: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Registers a serialVersionUID for descriptors that omit `uid(..)`.
    pub fn register_uid(&mut self, name: &str, uid: i64) {
        self.uids.register(name, uid);
    }

    /// Runs `action` against the sink, or queues it into the innermost open
    /// element batch.
    pub(crate) fn defer<F>(&mut self, action: F) -> Result<()>
    where
        F: FnOnce(&mut ByteWriter) -> Result<()> + 'static,
    {
        match self.deferred.last_mut() {
            Some(batch) => {
                batch.push(Box::new(action));
                Ok(())
            }
            None => action(&mut self.out),
        }
    }

    fn defer_boxed(&mut self, action: Action) -> Result<()> {
        match self.deferred.last_mut() {
            Some(batch) => {
                batch.push(action);
                Ok(())
            }
            None => action(&mut self.out),
        }
    }

    pub(crate) fn alloc(&mut self) -> &mut HandleAllocator {
        &mut self.handles
    }

    pub(crate) fn uid_for(&self, name: &str) -> Option<i64> {
        self.uids.lookup(name)
    }

    /// Bookkeeping shared by everything that is an element on the wire:
    /// bumps the enclosing batch count; `nestable` constructs additionally
    /// push a marker so inner elements do not count for the outer batch.
    fn on_started(&mut self, nestable: bool) {
        if let Some(Some(count)) = self.element_counts.last_mut() {
            *count += 1;
        }
        if nestable {
            self.element_counts.push(None);
        }
    }

    /// Construct prologue: leaves block-data mode (flushing a pending chunk
    /// before the tag, JOSS 6.2.1) and remembers the previous mode in the
    /// returned cell. The cell is shared with the deferred action because
    /// inside a batch the mode is only known at write time.
    fn begin_construct(&mut self, tag: u8, nestable: bool) -> Result<Rc<Cell<bool>>> {
        self.depth += 1;
        self.on_started(nestable);
        let saved = Rc::new(Cell::new(false));
        let cell = Rc::clone(&saved);
        self.defer(move |out| {
            cell.set(out.set_block_mode(false)?);
            out.write_u8(tag);
            Ok(())
        })?;
        Ok(saved)
    }

    /// Construct epilogue: restores the saved block-data mode, so that
    /// custom data following a nested construct lands in a fresh chunk.
    fn end_construct(&mut self, saved: Rc<Cell<bool>>, nestable: bool) -> Result<()> {
        if nestable {
            let marker = self.element_counts.pop();
            assert!(matches!(marker, Some(None)), "element batch left open");
        }
        self.depth -= 1;
        self.defer(move |out| {
            if saved.get() {
                out.set_block_mode(true)?;
            }
            Ok(())
        })
    }

    pub(crate) fn object_inner<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ObjectWriter<'a>) -> Result<()>,
    {
        let saved = self.begin_construct(TC_OBJECT, true)?;
        let result = {
            let mut scope = ObjectWriter { w: self, post_chain: handle.clone() };
            f(&mut scope)
        };
        let end = self.end_construct(saved, true);
        result.and(end)
    }

    pub(crate) fn class_inner<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        let saved = self.begin_construct(TC_CLASS, false)?;
        let result = {
            let mut chain = DescriptorsWriter::new(self, handle.clone(), false);
            f(&mut chain).and_then(|()| chain.finish())
        };
        let end = self.end_construct(saved, false);
        result.and(end)
    }

    pub(crate) fn array_inner<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ArrayWriter<'a>) -> Result<()>,
    {
        let saved = self.begin_construct(TC_ARRAY, true)?;
        let result = {
            let mut scope = ArrayWriter { w: self, post_chain: handle.clone() };
            f(&mut scope)
        };
        let end = self.end_construct(saved, true);
        result.and(end)
    }

    /// `name_handle` binds the constant-name string when the caller needs to
    /// reference it later; it consumes the next index either way.
    pub(crate) fn enum_inner<F>(
        &mut self,
        name: &str,
        handle: &Handle,
        name_handle: Option<&Handle>,
        f: F,
    ) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        let saved = self.begin_construct(TC_ENUM, false)?;
        let result = {
            let mut chain = DescriptorsWriter::new(self, handle.clone(), true);
            f(&mut chain).and_then(|()| chain.finish())
        };
        let result = result.and_then(|()| {
            // The constant name is a real string element (JOSS 6.4.2
            // newEnum), assigned the index after the enum itself.
            match name_handle {
                Some(h) => {
                    self.handles.assign(h)?;
                }
                None => {
                    self.handles.alloc_index();
                }
            }
            let name = name.to_string();
            self.defer(move |out| {
                out.write_string(&name);
                Ok(())
            })
        });
        let end = self.end_construct(saved, false);
        result.and(end)
    }

    pub(crate) fn string_inner(&mut self, s: &str, handle: &Handle) -> Result<()> {
        self.handles.assign(handle)?;
        self.on_started(false);
        let s = s.to_string();
        self.defer(move |out| {
            let saved = out.set_block_mode(false)?;
            out.write_string(&s);
            if saved {
                out.set_block_mode(true)?;
            }
            Ok(())
        })
    }

    pub(crate) fn null_inner(&mut self) -> Result<()> {
        self.on_started(false);
        self.defer(|out| {
            let saved = out.set_block_mode(false)?;
            out.write_u8(TC_NULL);
            if saved {
                out.set_block_mode(true)?;
            }
            Ok(())
        })
    }

    pub(crate) fn reference_inner(&mut self, handle: &Handle) -> Result<()> {
        // Resolved eagerly: references point strictly backwards (JOSS 6.4.3).
        let index = self.handles.resolve(handle)?;
        self.on_started(false);
        self.defer(move |out| {
            let saved = out.set_block_mode(false)?;
            out.write_u8(TC_REFERENCE);
            out.write_u32(BASE_WIRE_HANDLE + index);
            if saved {
                out.set_block_mode(true)?;
            }
            Ok(())
        })
    }

    pub(crate) fn block_inner(&mut self, bytes: &[u8]) -> Result<()> {
        let bytes = bytes.to_vec();
        self.defer(move |out| {
            out.set_block_mode(true)?;
            out.write_bytes(&bytes);
            out.set_block_mode(false)?;
            Ok(())
        })
    }

    /// Custom class data (writeObject / writeExternal body): block-data mode
    /// on, caller writes, terminator tag after the final flush.
    fn data_block<F>(&mut self, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DataWriter<'a>) -> Result<()>,
    {
        self.defer(|out| {
            out.set_block_mode(true)?;
            Ok(())
        })?;
        let base_depth = self.depth;
        let result = {
            let mut scope = DataWriter { w: self };
            f(&mut scope)
        };
        assert_eq!(self.depth, base_depth, "data block closure left a construct open");
        let term = self.defer(|out| {
            out.set_block_mode(false)?;
            out.write_u8(TC_ENDBLOCKDATA);
            Ok(())
        });
        result.and(term)
    }

    // --- top-level contents ---

    /// A serializable or externalizable object (TC_OBJECT). `handle` is
    /// assigned once the descriptor chain is declared.
    pub fn object<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ObjectWriter<'a>) -> Result<()>,
    {
        self.object_inner(handle, f)
    }

    /// A class object (TC_CLASS): a descriptor chain and nothing else.
    pub fn class<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        self.class_inner(handle, f)
    }

    /// An array (TC_ARRAY).
    pub fn array<F>(&mut self, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut ArrayWriter<'a>) -> Result<()>,
    {
        self.array_inner(handle, f)
    }

    /// An enum constant (TC_ENUM). The chain's descriptors are written with
    /// serialVersionUID 0 regardless of any `uid(..)` call (JOSS 6.4.2:
    /// enums always use 0L).
    pub fn enum_const<F>(&mut self, name: &str, handle: &Handle, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        self.enum_inner(name, handle, None, f)
    }

    /// Like [`enum_const`](Self::enum_const), additionally binding the
    /// constant-name string element to `name_handle`.
    pub fn enum_const_with<F>(
        &mut self,
        name: &str,
        handle: &Handle,
        name_handle: &Handle,
        f: F,
    ) -> Result<()>
    where
        F: for<'a> FnOnce(&mut DescriptorsWriter<'a>) -> Result<()>,
    {
        self.enum_inner(name, handle, Some(name_handle), f)
    }

    pub fn string(&mut self, s: &str) -> Result<()> {
        self.string_inner(s, &Handle::new())
    }

    /// A string bound to `handle` for later back references.
    pub fn string_with(&mut self, s: &str, handle: &Handle) -> Result<()> {
        self.string_inner(s, handle)
    }

    pub fn null(&mut self) -> Result<()> {
        self.null_inner()
    }

    /// A back reference to a previously declared element.
    pub fn reference(&mut self, handle: &Handle) -> Result<()> {
        self.reference_inner(handle)
    }

    /// A free-standing block-data chunk.
    pub fn block_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.block_inner(bytes)
    }

    /// Finishes the stream.
    ///
    /// # Panics
    ///
    /// Unbalanced nesting or an unwritten element batch at this point is a
    /// builder bug, not a data error, and panics.
    pub fn finish(self) -> Result<Vec<u8>> {
        assert_eq!(self.depth, 0, "unbalanced construct nesting");
        assert!(self.element_counts.is_empty(), "element count stack not empty");
        assert!(self.deferred.is_empty(), "element batch never written");
        log::debug!(
            "stream finished: {} bytes, {} handles",
            self.out.len(),
            self.handles.count()
        );
        self.out.close()
    }
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Scope of one TC_OBJECT construct.
pub struct ObjectWriter<'a> {
    w: &'a mut StreamWriter,
    post_chain: Handle,
}

impl ObjectWriter<'_> {
    /// Declares the descriptor chain, most-derived class first. Must come
    /// before any values or custom data.
    pub fn descriptors<F>(&mut self, f: F) -> Result<()>
    where
        F: for<'b> FnOnce(&mut DescriptorsWriter<'b>) -> Result<()>,
    {
        let mut chain = DescriptorsWriter::new(self.w, self.post_chain.clone(), false);
        f(&mut chain).and_then(|()| chain.finish())
    }

    /// Field values for one chain level. Called once per level, base class
    /// first, mirroring `defaultWriteFields` (JOSS 6.4.2 nowrclass: values
    /// run base to most-derived even though descriptors are declared the
    /// other way around).
    pub fn values<F>(&mut self, f: F) -> Result<()>
    where
        F: for<'b> FnOnce(&mut ValuesWriter<'b>) -> Result<()>,
    {
        let mut scope = ValuesWriter { w: &mut *self.w };
        f(&mut scope)
    }

    /// Custom data of a class with SC_WRITE_METHOD (JOSS 6.4.2 wrclass objectAnnotation).
    pub fn write_object<F>(&mut self, f: F) -> Result<()>
    where
        F: for<'b> FnOnce(&mut DataWriter<'b>) -> Result<()>,
    {
        self.w.data_block(f)
    }

    /// Externalizable data, protocol 2 (JOSS 6.4.2 externalContents with
    /// SC_BLOCK_DATA). The descriptor flags must carry
    /// SC_EXTERNALIZABLE|SC_BLOCK_DATA for readers to make sense of it.
    pub fn write_external<F>(&mut self, f: F) -> Result<()>
    where
        F: for<'b> FnOnce(&mut DataWriter<'b>) -> Result<()>,
    {
        self.w.data_block(f)
    }
}

/// Scope of one TC_ARRAY construct.
pub struct ArrayWriter<'a> {
    w: &'a mut StreamWriter,
    post_chain: Handle,
}

impl ArrayWriter<'_> {
    /// The array class descriptor chain (`[I`, `[Ljava.lang.Object;`, ..).
    pub fn descriptors<F>(&mut self, f: F) -> Result<()>
    where
        F: for<'b> FnOnce(&mut DescriptorsWriter<'b>) -> Result<()>,
    {
        let mut chain = DescriptorsWriter::new(self.w, self.post_chain.clone(), false);
        f(&mut chain).and_then(|()| chain.finish())
    }

    /// Elements of a primitive array: i32 count + packed values.
    pub fn primitive_elements(&mut self, values: &PrimitiveArray) -> Result<()> {
        let values = values.clone();
        self.w.defer(move |out| {
            out.write_primitive_array(&values);
            Ok(())
        })
    }

    /// Elements of an object array. The count is only known when the
    /// closure returns, so every write inside is queued; on close the i32
    /// count goes out first, then the queued element bytes. Handles are
    /// still assigned eagerly inside, in declaration order.
    pub fn elements<F>(&mut self, f: F) -> Result<()>
    where
        F: for<'b> FnOnce(&mut ValuesWriter<'b>) -> Result<()>,
    {
        self.w.deferred.push(Vec::new());
        self.w.element_counts.push(Some(0));
        let result = {
            let mut scope = ValuesWriter { w: &mut *self.w };
            f(&mut scope)
        };
        let count = match self.w.element_counts.pop() {
            Some(Some(count)) => count,
            _ => panic!("element batch marker lost"),
        };
        let actions = self.w.deferred.pop().expect("element batch queue lost");
        result?;
        self.w.defer(move |out| {
            out.write_i32(count as i32);
            Ok(())
        })?;
        for action in actions {
            self.w.defer_boxed(action)?;
        }
        Ok(())
    }
}

macro_rules! primitive_value_methods {
    () => {
        pub fn int(&mut self, v: i32) -> Result<()> {
            self.w.defer(move |out| {
                out.write_i32(v);
                Ok(())
            })
        }

        pub fn long(&mut self, v: i64) -> Result<()> {
            self.w.defer(move |out| {
                out.write_i64(v);
                Ok(())
            })
        }

        pub fn short(&mut self, v: i16) -> Result<()> {
            self.w.defer(move |out| {
                out.write_i16(v);
                Ok(())
            })
        }

        pub fn byte(&mut self, v: i8) -> Result<()> {
            self.w.defer(move |out| {
                out.write_i8(v);
                Ok(())
            })
        }

        /// Java `char`, a UTF-16 code unit.
        pub fn char(&mut self, v: u16) -> Result<()> {
            self.w.defer(move |out| {
                out.write_char(v);
                Ok(())
            })
        }

        pub fn boolean(&mut self, v: bool) -> Result<()> {
            self.w.defer(move |out| {
                out.write_bool(v);
                Ok(())
            })
        }

        pub fn float(&mut self, v: f32) -> Result<()> {
            self.w.defer(move |out| {
                out.write_f32(v);
                Ok(())
            })
        }

        pub fn double(&mut self, v: f64) -> Result<()> {
            self.w.defer(move |out| {
                out.write_f64(v);
                Ok(())
            })
        }
    };
}

macro_rules! nested_content_methods {
    () => {
        pub fn object<F>(&mut self, handle: &Handle, f: F) -> Result<()>
        where
            F: for<'b> FnOnce(&mut ObjectWriter<'b>) -> Result<()>,
        {
            self.w.object_inner(handle, f)
        }

        pub fn class<F>(&mut self, handle: &Handle, f: F) -> Result<()>
        where
            F: for<'b> FnOnce(&mut DescriptorsWriter<'b>) -> Result<()>,
        {
            self.w.class_inner(handle, f)
        }

        pub fn array<F>(&mut self, handle: &Handle, f: F) -> Result<()>
        where
            F: for<'b> FnOnce(&mut ArrayWriter<'b>) -> Result<()>,
        {
            self.w.array_inner(handle, f)
        }

        pub fn enum_const<F>(&mut self, name: &str, handle: &Handle, f: F) -> Result<()>
        where
            F: for<'b> FnOnce(&mut DescriptorsWriter<'b>) -> Result<()>,
        {
            self.w.enum_inner(name, handle, None, f)
        }

        pub fn enum_const_with<F>(
            &mut self,
            name: &str,
            handle: &Handle,
            name_handle: &Handle,
            f: F,
        ) -> Result<()>
        where
            F: for<'b> FnOnce(&mut DescriptorsWriter<'b>) -> Result<()>,
        {
            self.w.enum_inner(name, handle, Some(name_handle), f)
        }

        pub fn string(&mut self, s: &str) -> Result<()> {
            self.w.string_inner(s, &Handle::new())
        }

        pub fn string_with(&mut self, s: &str, handle: &Handle) -> Result<()> {
            self.w.string_inner(s, handle)
        }

        pub fn null(&mut self) -> Result<()> {
            self.w.null_inner()
        }

        pub fn reference(&mut self, handle: &Handle) -> Result<()> {
            self.w.reference_inner(handle)
        }
    };
}

/// Scope for field values and object array elements. Primitives are raw
/// unpadded big-endian values; nested constructs are full content elements.
pub struct ValuesWriter<'a> {
    w: &'a mut StreamWriter,
}

impl ValuesWriter<'_> {
    primitive_value_methods!();
    nested_content_methods!();
}

/// Scope of a custom data block (writeObject / writeExternal). Block-data
/// mode is active: primitives land in the current chunk, nested constructs
/// flush it, write themselves outside and re-enter the mode afterwards.
pub struct DataWriter<'a> {
    w: &'a mut StreamWriter,
}

impl DataWriter<'_> {
    primitive_value_methods!();
    nested_content_methods!();

    /// Raw bytes into the current chunk (`OutputStream.write`).
    pub fn bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let bytes = bytes.to_vec();
        self.w.defer(move |out| {
            out.write_bytes(&bytes);
            Ok(())
        })
    }

    /// Length-prefixed modified UTF-8 (`DataOutput.writeUTF`).
    pub fn utf(&mut self, s: &str) -> Result<()> {
        let s = s.to_string();
        self.w.defer(move |out| out.write_utf(&s))
    }
}
