//! Object factory
//!
//! Resolves logical type names (`module::Type`) against whatever unit the
//! registry holds at the moment of the call and returns the constructed
//! instance wrapped in a [`ReflectiveObject`].

use std::sync::Arc;
use tracing::debug;

use crate::error::ConstructError;
use crate::reflect::ReflectiveObject;
use crate::registry::VersionRegistry;
use crate::unit::{LoadedUnit, ModuleName, Visibility, params_accept};
use crate::value::Value;

/// Constructs objects from the currently registered units
#[derive(Clone)]
pub struct ObjectFactory {
    registry: Arc<VersionRegistry>,
    default_module: Option<ModuleName>,
}

impl ObjectFactory {
    pub fn new(registry: Arc<VersionRegistry>) -> Self {
        Self {
            registry,
            default_module: None,
        }
    }

    /// Module used for bare type names without a `module::` prefix
    pub fn with_default_module(mut self, module: impl Into<ModuleName>) -> Self {
        self.default_module = Some(module.into());
        self
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    /// Split a logical type name into module and type
    pub fn split_type_name<'a>(
        &self,
        logical: &'a str,
    ) -> Result<(ModuleName, &'a str), ConstructError> {
        let invalid = || ConstructError::InvalidTypeName(logical.to_string());
        match logical.rsplit_once("::") {
            Some((module, type_name)) => {
                if module.is_empty() || type_name.is_empty() {
                    return Err(invalid());
                }
                Ok((ModuleName::new(module), type_name))
            }
            None => {
                if logical.is_empty() {
                    return Err(invalid());
                }
                let module = self.default_module.clone().ok_or_else(invalid)?;
                Ok((module, logical))
            }
        }
    }

    /// Construct `module::Type` from the module's current unit
    pub fn construct(
        &self,
        logical: &str,
        args: Vec<Value>,
    ) -> Result<ReflectiveObject, ConstructError> {
        let (module, type_name) = self.split_type_name(logical)?;
        let unit = self
            .registry
            .current(module.as_str())
            .ok_or(ConstructError::ModuleNotLoaded(module))?;
        self.construct_from(&unit, type_name, args)
    }

    /// Construct a type from an explicit unit
    pub fn construct_from(
        &self,
        unit: &LoadedUnit,
        type_name: &str,
        args: Vec<Value>,
    ) -> Result<ReflectiveObject, ConstructError> {
        let shape = unit
            .resolve_type(type_name)
            .ok_or_else(|| ConstructError::TypeNotFound {
                module: unit.name().clone(),
                type_name: type_name.to_string(),
                version: unit.version(),
            })?;

        let mut order: Vec<usize> = (0..shape.constructors().len()).collect();
        order.sort_by_key(|&i| {
            let public = shape.constructors()[i].visibility == Visibility::Public;
            (!public, i)
        });
        let ctor = order
            .into_iter()
            .find(|&i| params_accept(&shape.constructors()[i].params, &args))
            .ok_or_else(|| ConstructError::NoMatchingConstructor {
                type_name: type_name.to_string(),
                arity: args.len(),
            })?;

        let instance =
            shape
                .construct(ctor, args)
                .map_err(|source| ConstructError::ConstructorThrew {
                    type_name: type_name.to_string(),
                    source,
                })?;
        debug!(
            "Constructed {}::{} from v{}",
            unit.name(),
            type_name,
            unit.version()
        );
        Ok(ReflectiveObject::new(unit.clone(), shape, instance))
    }
}
