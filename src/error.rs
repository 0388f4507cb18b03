//! Central error types for the Java Object Serialization stream tooling.
//!
//! Each variant references the relevant section of the Java Object
//! Serialization Specification chapter 6 (the stream protocol, "JOSS 6.x").

use core::fmt;

/// All error conditions raised while building or disassembling a stream.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// A `Handle` was assigned a second time (handles are write-once).
    HandleAlreadyAssigned,
    /// A `Handle` was resolved before anything assigned it (JOSS 6.4.3:
    /// references point strictly backwards).
    HandleUnassigned,
    /// Block-data mode was activated while already active (JOSS 6.2.1).
    BlockModeAlreadyActive,
    /// The stream was finished while block-data mode was still active.
    BlockModeActiveAtClose,
    /// The type name does not denote a Java primitive (JOSS 6.4.2 prim_typecode).
    NotAPrimitiveType(String),
    /// The type name denotes a bare primitive where an object or array
    /// type is required (JOSS 6.4.2 obj_typecode).
    NotAnObjectType(String),
    /// A proxy descriptor interface list entry is an array or primitive
    /// type name (JOSS 6.4.2 proxyClassDescInfo).
    NotAnInterface(String),
    /// A name's modified UTF-8 encoding exceeds 65535 bytes and cannot be
    /// written with a 2-byte length prefix (JOSS 6.4.2 utf).
    UtfTooLong(usize),
    /// A builder scope closed while required state was still missing.
    IncompleteConstruct(&'static str),
    /// The decoded trace contains a shape the replay driver cannot express.
    UnsupportedReplay(&'static str),
    /// No serialVersionUID was given and the registry has no entry for the
    /// class name (JOSS 6.4.2 serialVersionUID; there is no class to ask).
    UnknownSerialUid(String),

    /// The stream does not start with 0xACED (JOSS 6.4.2 STREAM_MAGIC).
    BadMagic(u16),
    /// The stream version is not 5 (JOSS 6.4.2 STREAM_VERSION).
    UnsupportedVersion(u16),
    /// The stream ended before a complete element was read.
    Truncated {
        offset: usize,
        expected: &'static str,
    },
    /// A tag byte does not fit the grammar production at this position
    /// (JOSS 6.4.2 content).
    UnexpectedTag {
        offset: usize,
        tag: u8,
        expected: &'static str,
    },
    /// A wire handle points at nothing assigned yet (JOSS 6.4.3).
    UnknownHandle { offset: usize, handle: u32 },
    /// A string is not valid modified UTF-8, or decodes to an unpaired
    /// surrogate that a Rust `String` cannot hold.
    MalformedUtf8 { offset: usize },
    /// Externalizable class data without SC_BLOCK_DATA (protocol 1) has no
    /// framing and cannot be parsed without the class (JOSS 6.4.2 externalContents).
    ExternalProtocol1 { offset: usize },
    /// A recognized but unsupported tag (TC_RESET, TC_EXCEPTION) appeared.
    UnsupportedTag { offset: usize, tag: u8 },
    /// A TC_ARRAY descriptor names a non-array class (JOSS 6.4.2 newArray).
    NotAnArrayType { offset: usize, name: String },
    /// Content or descriptor nesting past the decoder's recursion limit.
    NestingTooDeep { offset: usize, limit: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandleAlreadyAssigned => {
                write!(f, "handle already assigned, handles are write-once (JOSS 6.4.3)")
            }
            Self::HandleUnassigned => {
                write!(f, "handle resolved before assignment, references point backwards (JOSS 6.4.3)")
            }
            Self::BlockModeAlreadyActive => {
                write!(f, "block-data mode activated while already active (JOSS 6.2.1)")
            }
            Self::BlockModeActiveAtClose => {
                write!(f, "stream finished with block-data mode still active (JOSS 6.2.1)")
            }
            Self::NotAPrimitiveType(name) => {
                write!(f, "'{name}' is not a primitive type (JOSS 6.4.2 prim_typecode)")
            }
            Self::NotAnObjectType(name) => {
                write!(f, "'{name}' is not an object or array type (JOSS 6.4.2 obj_typecode)")
            }
            Self::NotAnInterface(name) => {
                write!(f, "'{name}' cannot be a proxy interface (JOSS 6.4.2 proxyClassDescInfo)")
            }
            Self::UtfTooLong(len) => {
                write!(f, "modified UTF-8 length {len} exceeds 65535 (JOSS 6.4.2 utf)")
            }
            Self::IncompleteConstruct(what) => {
                write!(f, "incomplete construct: {what}")
            }
            Self::UnsupportedReplay(what) => {
                write!(f, "trace cannot be replayed: {what}")
            }
            Self::UnknownSerialUid(name) => {
                write!(f, "no serialVersionUID known for '{name}' (JOSS 6.4.2 serialVersionUID)")
            }
            Self::BadMagic(magic) => {
                write!(f, "bad stream magic {magic:#06x}, expected 0xaced (JOSS 6.4.2 STREAM_MAGIC)")
            }
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported stream version {version}, expected 5 (JOSS 6.4.2 STREAM_VERSION)")
            }
            Self::Truncated { offset, expected } => {
                write!(f, "stream truncated at offset {offset} while reading {expected}")
            }
            Self::UnexpectedTag { offset, tag, expected } => {
                write!(
                    f,
                    "unexpected tag {} ({tag:#04x}) at offset {offset}, expected {expected} (JOSS 6.4.2)",
                    crate::protocol::tag_name(*tag)
                )
            }
            Self::UnknownHandle { offset, handle } => {
                write!(f, "reference to unknown handle {handle:#08x} at offset {offset} (JOSS 6.4.3)")
            }
            Self::MalformedUtf8 { offset } => {
                write!(f, "malformed modified UTF-8 at offset {offset}")
            }
            Self::ExternalProtocol1 { offset } => {
                write!(
                    f,
                    "externalizable data without SC_BLOCK_DATA at offset {offset} \
                     cannot be framed without the class (JOSS 6.4.2 externalContents)"
                )
            }
            Self::UnsupportedTag { offset, tag } => {
                write!(
                    f,
                    "unsupported tag {} ({tag:#04x}) at offset {offset}",
                    crate::protocol::tag_name(*tag)
                )
            }
            Self::NotAnArrayType { offset, name } => {
                write!(
                    f,
                    "array descriptor at offset {offset} names non-array class '{name}' \
                     (JOSS 6.4.2 newArray)"
                )
            }
            Self::NestingTooDeep { offset, limit } => {
                write!(f, "nesting at offset {offset} exceeds the decoder limit of {limit} levels")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A convenience `Result` type alias using [`Error`].
pub type Result<T> = core::result::Result<T, Error>;
