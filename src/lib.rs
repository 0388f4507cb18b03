//! jserial: Java Object Serialization streams without Java.
//!
//! Builds serialization streams (JOSS, chapter 6 of the Java Object
//! Serialization Specification) from explicit construction calls and
//! disassembles captured streams back into construction scripts. No class
//! files, no reflection, no JVM; descriptors, handles and custom data are
//! all spelled out by the caller. Useful for protocol tooling and security
//! research on serialization-based payloads.
//!
//! # Beispiel
//!
//! ```
//! use jserial::{Handle, StreamWriter};
//!
//! let mut w = StreamWriter::new();
//! w.object(&Handle::new(), |o| {
//!     o.descriptors(|descs| {
//!         descs.desc(|d| {
//!             d.type_name("Point");
//!             d.uid(1);
//!             d.field("x", "int")
//!         })
//!     })?;
//!     o.values(|v| v.int(7))
//! })
//! .unwrap();
//! let bytes = w.finish().unwrap();
//! assert_eq!(&bytes[..4], [0xAC, 0xED, 0x00, 0x05]);
//!
//! // Und zurück: Disassemblieren + byte-identisches Reencode.
//! let stream = jserial::decoder::decode(&bytes).unwrap();
//! assert_eq!(jserial::decoder::reencode(&stream).unwrap(), bytes);
//! ```

pub mod bytestream;
pub mod decoder;
pub mod descriptor;
pub mod encoder;
pub mod error;
pub mod handle;
pub mod mutf8;
pub mod protocol;
pub mod uid;

pub use error::{Error, Result};

/// HashMap mit ahash (schneller, nicht DoS-resistent; nur für interne
/// Datenstrukturen).
pub(crate) type FastHashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;

// Public API: Builder
pub use encoder::{ArrayWriter, DataWriter, ObjectWriter, StreamWriter, ValuesWriter};
pub use descriptor::{DescriptorWriter, DescriptorsWriter};
pub use handle::Handle;
pub use protocol::{PrimitiveArray, PrimitiveType};
pub use uid::UidRegistry;

// Public API: Disassembler
pub use decoder::{decode, reencode, render, replay, Content, Stream};
