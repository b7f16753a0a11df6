//! Host-side fault taxonomy.
//!
//! Everything in here means the *embedder* did something wrong (or the core
//! itself has a bug). User-caused conditions are never a `HostError`; they are
//! returned as diagnostic lists.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    /// The caller supplied a file under one of the reserved logical names.
    #[error("reserved logical file name {name:?} supplied by caller")]
    ReservedFileName { name: String },

    /// Two caller files collapse to the same stripped name.
    #[error("auxiliary files collide on stripped name {name:?}")]
    DuplicateFileName { name: String },

    /// The synthesized harness did not parse into the expected shape.
    #[error("synthesized harness is malformed: {detail}")]
    MalformedHarness { detail: String },

    /// The compiler yielded a diagnostic with no file and the code is not on
    /// the benign allow-list.
    #[error("compiler produced a file-less diagnostic TS{code}: {message}")]
    FilelessDiagnostic { code: u32, message: String },

    /// A harness-origin diagnostic matched no anchor node.
    #[error("harness diagnostic TS{code} at offset {start} matched no anchor")]
    UnmappedHarnessDiagnostic { code: u32, start: usize },

    /// A registered message mapper claimed a code but rejected the text.
    #[error("message mapper for TS{code} did not understand: {message:?}")]
    MessageMapperContract { code: u32, message: String },

    /// A link-time specifier missed the compiled module set. Compilation
    /// should have rejected the program instead.
    #[error("import specifier {specifier:?} resolves to no compiled module")]
    UnresolvedSpecifier { specifier: String },

    /// A fault raised before any user code ran.
    #[error("fault outside user code: {message}")]
    EmbeddingFault { message: String },

    /// The underlying compiler or JavaScript engine failed.
    #[error("engine error: {message}")]
    Engine { message: String },
}

impl HostError {
    pub(crate) fn engine(message: impl Into<String>) -> Self {
        HostError::Engine {
            message: message.into(),
        }
    }
}
