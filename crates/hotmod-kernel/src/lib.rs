//! hotmod kernel
//!
//! Core of the hot module reload engine: the value model, the loaded-unit
//! capability traits, the version registry, the reload dispatcher and the
//! reflective access layer built on top of them.

// value module
pub mod value;
pub use value::{FromValue, IntoValue, Value, ValueKind};

// unit module
pub mod unit;
pub use unit::*;

// error module
pub mod error;
pub use error::*;

// native unit module
pub mod native;

// registry module
pub mod registry;
pub use registry::{Swap, VersionRegistry};

// dispatch module
pub mod dispatch;
pub use dispatch::{
    CallbackError, DispatchReport, ModuleFilter, ReloadDispatcher, ReloadNotice,
    SubscriptionHandle, SubscriptionId,
};

// reflect module
pub mod reflect;
pub use reflect::{MemberAccessor, ReflectiveObject};

// factory module
pub mod factory;
pub use factory::ObjectFactory;
