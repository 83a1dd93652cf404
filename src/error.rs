use thiserror::Error;

use crate::ir::ValueId;
use crate::transform::UnsafeReason;

/// The generic Error type, which provides coverage for all errors this library can
/// potentially return.
///
/// The taxonomy follows the lifecycle of a lazification attempt: candidate
/// validation, slice safety analysis, and post-synthesis verification. All
/// non-fatal errors are local to a single attempt and leave the module
/// untouched; [`Error::MalformedSsa`] indicates an implementation bug and
/// should abort the pass.
///
/// # Examples
///
/// ```rust,ignore
/// use lazify::{Error, transform::LazifyPass};
///
/// match pass.lazify_call_site(&mut module, caller, call, 2) {
///     Ok(()) => println!("call site rewritten"),
///     Err(Error::UnsafeSlice { reason }) => {
///         eprintln!("slice rejected: {reason}");
///     }
///     Err(Error::NotLazifiable { .. }) => {
///         eprintln!("candidate skipped");
///     }
///     Err(e) => return Err(e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The candidate (call site, argument) pair cannot be lazified.
    ///
    /// Raised before any analysis runs: the argument at the requested index
    /// is not an instruction of the caller (e.g. it is a formal parameter),
    /// the call site does not exist, or the callee is not a direct call.
    /// Drivers report and skip.
    #[error("argument is not lazifiable - {message}")]
    NotLazifiable {
        /// Why the candidate was rejected.
        message: String,
    },

    /// The slice failed the outline safety check.
    ///
    /// One of the safety predicates rejected the slice: an instruction may
    /// throw, touch memory, or diverge, an allocation escapes, or the slice
    /// interacts badly with the call site's loop nest. The module is left
    /// unchanged.
    #[error("slice cannot be outlined - {reason}")]
    UnsafeSlice {
        /// The specific predicate that rejected the slice.
        reason: UnsafeReason,
    },

    /// The post-synthesis SSA verifier rejected a generated function.
    ///
    /// This is a contract violation of the transformation itself, never of
    /// the input: the outlined function, cloned callee, and rewritten caller
    /// must all verify. Treat as fatal and abort the pass.
    #[error("malformed SSA in '{function}': {details}")]
    MalformedSsa {
        /// Name of the function that failed verification.
        function: String,
        /// Concatenated verifier findings.
        details: String,
    },

    /// A malformed query against the IR itself.
    ///
    /// Raised when a driver hands the core a dangling reference: a value
    /// with no definition, a block index out of range, an argument index
    /// past the end of a call's operand list.
    #[error("invalid IR reference - {0}")]
    Ir(String),

    /// A value was expected to be defined by an instruction but is not.
    ///
    /// Carries the offending value so drivers can point at the culprit.
    #[error("value {0} has no defining instruction")]
    NoDefinition(ValueId),
}

/// Convenience `Result` alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
