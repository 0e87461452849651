use smol_str::SmolStr;
use thiserror::Error;

/// Errors produced while marshaling values or calling across the host/VM boundary.
///
/// Argument-binding failures inside a host function never escape as Rust
/// errors: the call bridge turns them into script errors. Everything the VM
/// raises during a host-initiated call comes back as `Runtime`, `Syntax`,
/// `Memory` or `ErrorHandler` carrying the VM's message (with traceback for
/// protected calls).
#[derive(Debug, Clone, Error)]
pub enum LuaError {
    /// A value was expected but the slot was empty.
    #[error("no value (expected {expected})")]
    NoValue { expected: &'static str },

    /// A value was present but failed the declared type's predicate.
    #[error("{expected} expected, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A value passed its predicate but did not fit the host representation.
    #[error("cannot convert {from} to {to}")]
    ConversionFailure {
        from: &'static str,
        to: &'static str,
    },

    /// Argument binding failure, tagged with the 1-based argument position.
    #[error("bad argument #{position} ({cause})")]
    BadArgument {
        position: usize,
        cause: Box<LuaError>,
    },

    /// A host function received the wrong number of arguments.
    #[error("wrong number of arguments: expected {expected}, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    /// Error raised by script code (message plus traceback when available).
    #[error("{0}")]
    Runtime(String),

    /// Source failed to compile.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The VM failed to allocate memory.
    #[error("memory error: {0}")]
    Memory(String),

    /// The message handler itself failed while handling an error.
    #[error("error in error handling: {0}")]
    ErrorHandler(String),

    /// A table converted to a sequence had a hole at `missing`.
    #[error("table is not a sequence: index {missing} is missing")]
    SparseTable { missing: i64 },

    /// An instance was created for a type that was never registered.
    #[error("type '{0}' is not registered")]
    UnregisteredType(&'static str),

    /// Two host types tried to register under the same VM-visible name.
    #[error("type name '{0}' is already registered by another type")]
    TypeNameConflict(SmolStr),

    /// The embedded instance is already mutably borrowed (or borrowed when
    /// a mutable borrow was requested).
    #[error("instance of '{0}' is already borrowed")]
    InstanceBorrowed(&'static str),

    /// The embedded instance was destroyed by its finalizer.
    #[error("instance of '{0}' has been finalized")]
    InstanceFinalized(&'static str),

    /// A handle created by one interpreter was used with another.
    #[error("value belongs to a different interpreter")]
    ForeignHandle,

    /// Script code was invoked from inside a custom-type finalizer.
    #[error("cannot call into the VM from a finalizer")]
    FinalizerReentry,

    /// Error originating from host code.
    #[error("{0}")]
    External(String),
}

impl LuaError {
    /// Wrap any displayable host error.
    pub fn external(error: impl std::fmt::Display) -> Self {
        LuaError::External(error.to_string())
    }

    pub(crate) fn bad_argument(position: usize, cause: LuaError) -> Self {
        LuaError::BadArgument {
            position,
            cause: Box::new(cause),
        }
    }

    /// True for errors the VM raised (as opposed to marshaling failures).
    pub fn is_vm_error(&self) -> bool {
        matches!(
            self,
            LuaError::Runtime(_)
                | LuaError::Syntax(_)
                | LuaError::Memory(_)
                | LuaError::ErrorHandler(_)
        )
    }
}
