//! Typed errors for the kernel.
//!
//! Each failure class of the reload pipeline and the reflective layer has
//! its own enum so callers can match on exactly what they invoked.

use thiserror::Error;

use crate::dispatch::SubscriptionId;
use crate::unit::{CodeFault, ModuleName};
use crate::value::ValueKind;

/// Errors produced while turning artifact bytes into loaded code.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The bytes do not form a valid code unit.
    #[error("Malformed artifact: {0}")]
    Malformed(String),

    /// The artifact was built against a different loader API.
    #[error("Incompatible artifact: expected API version {expected}, got {actual}")]
    Incompatible { expected: u32, actual: u32 },

    /// The loader could not stage the artifact for loading.
    #[error("Loader I/O error: {0}")]
    Io(String),
}

/// Errors produced while resolving and constructing a type by name.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ConstructError {
    /// The logical type name could not be split into module and type.
    #[error("Invalid type name: {0:?}")]
    InvalidTypeName(String),

    /// No unit is currently published for the module.
    #[error("Module not loaded: {0}")]
    ModuleNotLoaded(ModuleName),

    /// The current unit does not define the type.
    #[error("Type {type_name} not found in module {module} (v{version})")]
    TypeNotFound {
        module: ModuleName,
        type_name: String,
        version: u64,
    },

    /// No constructor accepts the argument list.
    #[error("No constructor of {type_name} accepts {arity} argument(s) of the given kinds")]
    NoMatchingConstructor { type_name: String, arity: usize },

    /// The selected constructor raised a failure.
    #[error("Constructor of {type_name} failed: {source}")]
    ConstructorThrew {
        type_name: String,
        #[source]
        source: CodeFault,
    },
}

/// Errors produced by name-based method invocation.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum InvokeError {
    /// No method with this name exists on the bound type.
    #[error("Method {type_name}.{method} not found")]
    NotFound { type_name: String, method: String },

    /// Methods with this name exist but none accepts the arguments.
    #[error("No overload of {type_name}.{method} accepts {arity} argument(s) of the given kinds")]
    ArgMismatch {
        type_name: String,
        method: String,
        arity: usize,
    },

    /// The method body raised a failure.
    #[error("Method {type_name}.{method} failed: {source}")]
    Threw {
        type_name: String,
        method: String,
        #[source]
        source: CodeFault,
    },

    /// The method returned a value of a different kind than declared.
    #[error("Method {method} declared to return {declared} but returned {actual}")]
    ReturnMismatch {
        method: String,
        declared: ValueKind,
        actual: ValueKind,
    },
}

/// Errors produced by field/property access.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum MemberError {
    /// Neither a field nor a property has this name.
    #[error("Member {type_name}.{member} not found")]
    NotFound { type_name: String, member: String },

    /// The caller's expected type differs from the declared member type.
    #[error("Member {member} is declared {declared}, caller expected {expected}")]
    TypeMismatch {
        member: String,
        declared: ValueKind,
        expected: ValueKind,
    },

    /// The member has no setter.
    #[error("Member {member} is read-only")]
    ReadOnly { member: String },

    /// The accessor body raised a failure.
    #[error("Accessing {member} failed: {source}")]
    Faulted {
        member: String,
        #[source]
        source: CodeFault,
    },
}

/// A subscriber callback that failed during a notification pass.
#[derive(Debug, Clone, Error)]
#[error("Reload subscriber {subscription} failed for module {module}: {reason}")]
pub struct DispatchCallbackError {
    pub subscription: SubscriptionId,
    pub module: ModuleName,
    pub reason: String,
    pub panicked: bool,
}
