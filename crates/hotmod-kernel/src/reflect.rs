//! Reflective object access
//!
//! A [`ReflectiveObject`] binds one instance to the unit it was constructed
//! from and offers name-based method invocation and member access. Every
//! lookup resolves against that bound unit, so an object created before a
//! reload keeps running the code it was created with.
//!
//! Overloads are resolved with a fixed search order: public before
//! non-public, static before instance, then declaration order. The first
//! candidate whose parameters accept the arguments wins. Members are
//! searched public before non-public, fields before properties, then
//! declaration order.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{InvokeError, MemberError};
use crate::unit::{
    Instance, LoadedUnit, MemberDecl, MemberKind, MethodDecl, TypeShape, Visibility,
    params_accept,
};
use crate::value::{FromValue, IntoValue, Value, ValueKind};

fn visibility_rank(visibility: Visibility) -> u8 {
    match visibility {
        Visibility::Public => 0,
        Visibility::NonPublic => 1,
    }
}

/// Indices of every method named `name`, in overload search order
pub fn resolve_method(shape: &dyn TypeShape, name: &str) -> Vec<usize> {
    let mut candidates: Vec<(usize, &MethodDecl)> = shape
        .methods()
        .iter()
        .enumerate()
        .filter(|(_, m)| m.name == name)
        .collect();
    candidates.sort_by_key(|(index, m)| (visibility_rank(m.visibility), !m.is_static, *index));
    candidates.into_iter().map(|(index, _)| index).collect()
}

/// Index of the member named `name` that wins the member search order
pub fn resolve_member(shape: &dyn TypeShape, name: &str) -> Option<usize> {
    shape
        .members()
        .iter()
        .enumerate()
        .filter(|(_, m)| m.name == name)
        .min_by_key(|(index, m)| {
            let kind_rank = match m.kind {
                MemberKind::Field => 0,
                MemberKind::Property => 1,
            };
            (visibility_rank(m.visibility), kind_rank, *index)
        })
        .map(|(index, _)| index)
}

/// An instance bound to the unit that produced it
pub struct ReflectiveObject {
    unit: LoadedUnit,
    shape: Arc<dyn TypeShape>,
    instance: Instance,
    method_cache: DashMap<String, Arc<[usize]>>,
    member_cache: DashMap<String, Option<usize>>,
}

impl ReflectiveObject {
    /// Bind `instance`, created by `shape` from `unit`
    pub fn new(unit: LoadedUnit, shape: Arc<dyn TypeShape>, instance: Instance) -> Self {
        Self {
            unit,
            shape,
            instance,
            method_cache: DashMap::new(),
            member_cache: DashMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        self.shape.name()
    }

    /// The unit this object was constructed from
    pub fn unit(&self) -> &LoadedUnit {
        &self.unit
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn instance_id(&self) -> uuid::Uuid {
        self.instance.id()
    }

    pub fn shape(&self) -> &Arc<dyn TypeShape> {
        &self.shape
    }

    /// Distinct method names in declaration order
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for method in self.shape.methods() {
            if !names.contains(&method.name.as_str()) {
                names.push(&method.name);
            }
        }
        names
    }

    /// Distinct field and property names in declaration order
    pub fn member_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for member in self.shape.members() {
            if !names.contains(&member.name.as_str()) {
                names.push(&member.name);
            }
        }
        names
    }

    fn candidates(&self, method: &str) -> Arc<[usize]> {
        if let Some(found) = self.method_cache.get(method) {
            return found.clone();
        }
        let resolved: Arc<[usize]> = resolve_method(self.shape.as_ref(), method).into();
        self.method_cache
            .insert(method.to_string(), resolved.clone());
        resolved
    }

    /// Invoke a method by name
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, InvokeError> {
        let candidates = self.candidates(method);
        if candidates.is_empty() {
            return Err(InvokeError::NotFound {
                type_name: self.type_name().to_string(),
                method: method.to_string(),
            });
        }

        let methods = self.shape.methods();
        let index = candidates
            .iter()
            .copied()
            .find(|&i| params_accept(&methods[i].params, &args))
            .ok_or_else(|| InvokeError::ArgMismatch {
                type_name: self.type_name().to_string(),
                method: method.to_string(),
                arity: args.len(),
            })?;
        let decl = &methods[index];

        let this = if decl.is_static {
            None
        } else {
            Some(&self.instance)
        };
        let value = self
            .shape
            .call(index, this, args)
            .map_err(|source| InvokeError::Threw {
                type_name: self.type_name().to_string(),
                method: method.to_string(),
                source,
            })?;

        if !decl.returns.accepts(&value) {
            return Err(InvokeError::ReturnMismatch {
                method: method.to_string(),
                declared: decl.returns,
                actual: value.kind(),
            });
        }
        Ok(value)
    }

    /// Invoke a method and convert its result
    pub fn call<T: FromValue>(&self, method: &str, args: Vec<Value>) -> Result<T, InvokeError> {
        self.invoke(method, args)?
            .into_typed::<T>()
            .map_err(|value| InvokeError::ReturnMismatch {
                method: method.to_string(),
                declared: T::KIND,
                actual: value.kind(),
            })
    }

    /// Look up a field or property by name
    pub fn member(&self, name: &str) -> Result<MemberAccessor<'_>, MemberError> {
        let index = match self.member_cache.get(name) {
            Some(found) => *found,
            None => {
                let resolved = resolve_member(self.shape.as_ref(), name);
                self.member_cache.insert(name.to_string(), resolved);
                resolved
            }
        };
        match index {
            Some(index) => Ok(MemberAccessor {
                object: self,
                index,
            }),
            None => Err(MemberError::NotFound {
                type_name: self.type_name().to_string(),
                member: name.to_string(),
            }),
        }
    }

    /// Read a member without a typed expectation
    pub fn get_value(&self, name: &str) -> Result<Value, MemberError> {
        self.member(name)?.get::<Value>()
    }

    /// Write a member without a typed expectation
    pub fn set_value(&self, name: &str, value: Value) -> Result<(), MemberError> {
        self.member(name)?.set(value)
    }
}

impl fmt::Debug for ReflectiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectiveObject")
            .field("type", &self.type_name())
            .field("module", self.unit.name())
            .field("version", &self.unit.version())
            .field("instance", &self.instance.id())
            .finish()
    }
}

/// Typed get/set access to one resolved member
pub struct MemberAccessor<'a> {
    object: &'a ReflectiveObject,
    index: usize,
}

impl MemberAccessor<'_> {
    pub fn decl(&self) -> &MemberDecl {
        &self.object.shape.members()[self.index]
    }

    fn check_expected(&self, expected: ValueKind) -> Result<(), MemberError> {
        let decl = self.decl();
        if decl.ty == ValueKind::Any || decl.ty.is_compatible_with(expected) {
            Ok(())
        } else {
            Err(MemberError::TypeMismatch {
                member: decl.name.clone(),
                declared: decl.ty,
                expected,
            })
        }
    }

    /// Read the member as `T`
    pub fn get<T: FromValue>(&self) -> Result<T, MemberError> {
        self.check_expected(T::KIND)?;
        let decl = self.decl();
        let value = self
            .object
            .shape
            .read(self.index, &self.object.instance)
            .map_err(|source| MemberError::Faulted {
                member: decl.name.clone(),
                source,
            })?;
        T::from_value(value).map_err(|value| MemberError::TypeMismatch {
            member: decl.name.clone(),
            declared: value.kind(),
            expected: T::KIND,
        })
    }

    /// Write `value` to the member
    pub fn set<T: IntoValue>(&self, value: T) -> Result<(), MemberError> {
        self.check_expected(T::KIND)?;
        let decl = self.decl();
        if !decl.writable {
            return Err(MemberError::ReadOnly {
                member: decl.name.clone(),
            });
        }
        let value = value.into_value();
        if !decl.ty.accepts(&value) {
            return Err(MemberError::TypeMismatch {
                member: decl.name.clone(),
                declared: decl.ty,
                expected: value.kind(),
            });
        }
        self.object
            .shape
            .write(self.index, &self.object.instance, value)
            .map_err(|source| MemberError::Faulted {
                member: decl.name.clone(),
                source,
            })
    }
}
