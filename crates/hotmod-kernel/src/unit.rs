//! Loaded units and the type-shape capability
//!
//! A loader turns artifact bytes into [`LoadedCode`]; the registry seals it
//! into a [`LoadedUnit`] carrying the module name and version sequence.
//! Code never leaves the process once loaded: units stay valid for as long
//! as anything references them.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::LoadError;
use crate::value::{Value, ValueKind};

/// Stable module identity used as the registry key
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ModuleName(Arc<str>);

impl ModuleName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ModuleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ModuleName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<ModuleName> for String {
    fn from(name: ModuleName) -> Self {
        name.0.to_string()
    }
}

impl PartialEq<str> for ModuleName {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ModuleName {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// Declared visibility of a constructor, method or member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    #[serde(alias = "private", alias = "internal", alias = "nonpublic")]
    NonPublic,
}

/// A declared parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ValueKind,
}

impl ParamDecl {
    pub fn new(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// Whether `args` fit the declared parameter list by arity and kind
pub fn params_accept(params: &[ParamDecl], args: &[Value]) -> bool {
    params.len() == args.len() && params.iter().zip(args).all(|(p, a)| p.kind.accepts(a))
}

/// A declared constructor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConstructorDecl {
    pub params: Vec<ParamDecl>,
    pub visibility: Visibility,
}

/// A declared method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub returns: ValueKind,
    pub is_static: bool,
    pub visibility: Visibility,
}

/// Whether a member is stored data or computed accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Property,
}

/// A declared field or property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDecl {
    pub name: String,
    pub ty: ValueKind,
    pub kind: MemberKind,
    pub visibility: Visibility,
    pub writable: bool,
}

/// A failure raised by loaded code while constructing, calling or accessing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CodeFault {
    message: String,
}

impl CodeFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An object produced by a type shape
///
/// The state is opaque to everything but the type system that created it.
#[derive(Clone)]
pub struct Instance {
    id: uuid::Uuid,
    state: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    pub fn new<S: Any + Send + Sync>(state: S) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            state: Arc::new(state),
        }
    }

    /// Unique id of this instance
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Borrow the state as the concrete type the owning type system stored
    pub fn state<S: Any>(&self) -> Option<&S> {
        self.state.downcast_ref::<S>()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance").field("id", &self.id).finish()
    }
}

/// Inspection and invocation capability of one type inside a unit
///
/// Declarations are returned in declaration order; indices into these
/// slices identify the constructor, method or member for the primitive
/// operations.
pub trait TypeShape: Send + Sync {
    fn name(&self) -> &str;

    fn constructors(&self) -> &[ConstructorDecl];

    fn methods(&self) -> &[MethodDecl];

    fn members(&self) -> &[MemberDecl];

    fn construct(&self, ctor: usize, args: Vec<Value>) -> Result<Instance, CodeFault>;

    /// Call a method; `this` is `None` for static methods
    fn call(
        &self,
        method: usize,
        this: Option<&Instance>,
        args: Vec<Value>,
    ) -> Result<Value, CodeFault>;

    fn read(&self, member: usize, this: &Instance) -> Result<Value, CodeFault>;

    fn write(&self, member: usize, this: &Instance, value: Value) -> Result<(), CodeFault>;
}

/// Loaded code for one version of a module
pub trait UnitCode: Send + Sync + 'static {
    /// Module name the code declares for itself
    fn module_name(&self) -> &str;

    /// Names of the types this unit defines, in declaration order
    fn type_names(&self) -> Vec<&str>;

    fn resolve_type(&self, name: &str) -> Option<Arc<dyn TypeShape>>;

    /// Content digest of the artifact the code came from
    fn digest(&self) -> Option<&str> {
        None
    }
}

/// Shared handle to loader output
pub type LoadedCode = Arc<dyn UnitCode>;

/// Turns artifact bytes into loaded code
///
/// Implementations may allocate process-wide resources (executable memory,
/// open libraries) that are never released: old versions are never
/// unloaded so that instances created from them stay valid.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, bytes: &[u8]) -> Result<LoadedCode, LoadError>;

    /// Short name used in logs
    fn kind(&self) -> &'static str {
        "custom"
    }
}

struct UnitInner {
    name: ModuleName,
    version: u64,
    code: LoadedCode,
    published_at: SystemTime,
}

/// One version of a module, as published by the registry
#[derive(Clone)]
pub struct LoadedUnit {
    inner: Arc<UnitInner>,
}

impl LoadedUnit {
    pub(crate) fn sealed(name: ModuleName, version: u64, code: LoadedCode) -> Self {
        Self {
            inner: Arc::new(UnitInner {
                name,
                version,
                code,
                published_at: SystemTime::now(),
            }),
        }
    }

    /// Wrap code that never went through a registry, such as a statically
    /// linked fallback; its version is 0.
    pub fn detached(code: LoadedCode) -> Self {
        let name = ModuleName::new(code.module_name());
        Self::sealed(name, 0, code)
    }

    pub fn name(&self) -> &ModuleName {
        &self.inner.name
    }

    /// Version sequence number assigned at publish time
    pub fn version(&self) -> u64 {
        self.inner.version
    }

    pub fn is_detached(&self) -> bool {
        self.inner.version == 0
    }

    pub fn code(&self) -> &LoadedCode {
        &self.inner.code
    }

    pub fn published_at(&self) -> SystemTime {
        self.inner.published_at
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.inner.code.type_names()
    }

    pub fn resolve_type(&self, name: &str) -> Option<Arc<dyn TypeShape>> {
        self.inner.code.resolve_type(name)
    }

    /// Whether both handles refer to the same published unit
    pub fn same_unit(&self, other: &LoadedUnit) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether this unit wraps exactly `code`
    pub fn holds(&self, code: &LoadedCode) -> bool {
        Arc::ptr_eq(&self.inner.code, code)
    }
}

impl fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("digest", &self.inner.code.digest())
            .finish()
    }
}

impl PartialEq for LoadedUnit {
    fn eq(&self, other: &Self) -> bool {
        self.same_unit(other)
    }
}
