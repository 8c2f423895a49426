//! Statically linked units built from Rust closures
//!
//! A [`NativeUnit`] is how host code describes "its own" version of a
//! module, used as the fallback for
//! [`VersionRegistry::latest_or`](crate::registry::VersionRegistry::latest_or)
//! and as the payload exported by native dynamic libraries.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::unit::{
    CodeFault, ConstructorDecl, Instance, LoadedCode, MemberDecl, MemberKind, MethodDecl,
    ParamDecl, TypeShape, UnitCode, Visibility,
};
use crate::value::{Value, ValueKind};

/// Field storage of a native object
pub type Fields = BTreeMap<String, Value>;

type InstanceBody = dyn Fn(&mut Fields, Vec<Value>) -> Result<Value, CodeFault> + Send + Sync;
type StaticBody = dyn Fn(Vec<Value>) -> Result<Value, CodeFault> + Send + Sync;
type CtorBody = dyn Fn(&mut Fields, Vec<Value>) -> Result<(), CodeFault> + Send + Sync;
type Getter = dyn Fn(&Fields) -> Result<Value, CodeFault> + Send + Sync;
type Setter = dyn Fn(&mut Fields, Value) -> Result<(), CodeFault> + Send + Sync;

enum MethodBody {
    Instance(Arc<InstanceBody>),
    Static(Arc<StaticBody>),
}

enum MemberImpl {
    Field { default: Value },
    Property {
        get: Arc<Getter>,
        set: Option<Arc<Setter>>,
    },
}

struct NativeObject {
    fields: Mutex<Fields>,
}

fn params_of(params: &[(&str, ValueKind)]) -> Vec<ParamDecl> {
    params
        .iter()
        .map(|(name, kind)| ParamDecl::new(name, *kind))
        .collect()
}

/// A method definition for [`NativeType::with_method`]
pub struct NativeMethod {
    decl: MethodDecl,
    body: MethodBody,
}

impl NativeMethod {
    /// An instance method receiving the object's fields
    pub fn instance<F>(name: &str, body: F) -> Self
    where
        F: Fn(&mut Fields, Vec<Value>) -> Result<Value, CodeFault> + Send + Sync + 'static,
    {
        Self {
            decl: MethodDecl {
                name: name.to_string(),
                params: Vec::new(),
                returns: ValueKind::Any,
                is_static: false,
                visibility: Visibility::Public,
            },
            body: MethodBody::Instance(Arc::new(body)),
        }
    }

    /// A static method with no receiver
    pub fn static_fn<F>(name: &str, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, CodeFault> + Send + Sync + 'static,
    {
        Self {
            decl: MethodDecl {
                name: name.to_string(),
                params: Vec::new(),
                returns: ValueKind::Any,
                is_static: true,
                visibility: Visibility::Public,
            },
            body: MethodBody::Static(Arc::new(body)),
        }
    }

    pub fn with_params(mut self, params: &[(&str, ValueKind)]) -> Self {
        self.decl.params = params_of(params);
        self
    }

    pub fn with_returns(mut self, returns: ValueKind) -> Self {
        self.decl.returns = returns;
        self
    }

    pub fn non_public(mut self) -> Self {
        self.decl.visibility = Visibility::NonPublic;
        self
    }
}

/// A type definition inside a [`NativeUnit`]
pub struct NativeType {
    name: String,
    constructors: Vec<ConstructorDecl>,
    ctor_bodies: Vec<Arc<CtorBody>>,
    methods: Vec<MethodDecl>,
    method_bodies: Vec<MethodBody>,
    members: Vec<MemberDecl>,
    member_impls: Vec<MemberImpl>,
}

impl NativeType {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            constructors: Vec::new(),
            ctor_bodies: Vec::new(),
            methods: Vec::new(),
            method_bodies: Vec::new(),
            members: Vec::new(),
            member_impls: Vec::new(),
        }
    }

    /// Add a public constructor
    pub fn with_constructor<F>(mut self, params: &[(&str, ValueKind)], body: F) -> Self
    where
        F: Fn(&mut Fields, Vec<Value>) -> Result<(), CodeFault> + Send + Sync + 'static,
    {
        self.constructors.push(ConstructorDecl {
            params: params_of(params),
            visibility: Visibility::Public,
        });
        self.ctor_bodies.push(Arc::new(body));
        self
    }

    pub fn with_method(mut self, method: NativeMethod) -> Self {
        self.methods.push(method.decl);
        self.method_bodies.push(method.body);
        self
    }

    /// Add a public, writable field
    pub fn with_field(self, name: &str, ty: ValueKind, default: impl Into<Value>) -> Self {
        self.push_field(name, ty, default.into(), Visibility::Public)
    }

    pub fn with_non_public_field(
        self,
        name: &str,
        ty: ValueKind,
        default: impl Into<Value>,
    ) -> Self {
        self.push_field(name, ty, default.into(), Visibility::NonPublic)
    }

    /// Add a read-only computed property
    pub fn with_property<G>(mut self, name: &str, ty: ValueKind, get: G) -> Self
    where
        G: Fn(&Fields) -> Result<Value, CodeFault> + Send + Sync + 'static,
    {
        self.members.push(MemberDecl {
            name: name.to_string(),
            ty,
            kind: MemberKind::Property,
            visibility: Visibility::Public,
            writable: false,
        });
        self.member_impls.push(MemberImpl::Property {
            get: Arc::new(get),
            set: None,
        });
        self
    }

    /// Add a computed property with a setter
    pub fn with_property_rw<G, S>(mut self, name: &str, ty: ValueKind, get: G, set: S) -> Self
    where
        G: Fn(&Fields) -> Result<Value, CodeFault> + Send + Sync + 'static,
        S: Fn(&mut Fields, Value) -> Result<(), CodeFault> + Send + Sync + 'static,
    {
        self.members.push(MemberDecl {
            name: name.to_string(),
            ty,
            kind: MemberKind::Property,
            visibility: Visibility::Public,
            writable: true,
        });
        self.member_impls.push(MemberImpl::Property {
            get: Arc::new(get),
            set: Some(Arc::new(set)),
        });
        self
    }

    fn push_field(
        mut self,
        name: &str,
        ty: ValueKind,
        default: Value,
        visibility: Visibility,
    ) -> Self {
        self.members.push(MemberDecl {
            name: name.to_string(),
            ty,
            kind: MemberKind::Field,
            visibility,
            writable: true,
        });
        self.member_impls.push(MemberImpl::Field { default });
        self
    }

    fn object<'a>(&self, this: &'a Instance) -> Result<&'a NativeObject, CodeFault> {
        this.state::<NativeObject>().ok_or_else(|| {
            CodeFault::new(format!("instance was not created by native type {}", self.name))
        })
    }

    fn default_fields(&self) -> Fields {
        self.members
            .iter()
            .zip(&self.member_impls)
            .filter_map(|(decl, imp)| match imp {
                MemberImpl::Field { default } => Some((decl.name.clone(), default.clone())),
                MemberImpl::Property { .. } => None,
            })
            .collect()
    }
}

impl TypeShape for NativeType {
    fn name(&self) -> &str {
        &self.name
    }

    fn constructors(&self) -> &[ConstructorDecl] {
        &self.constructors
    }

    fn methods(&self) -> &[MethodDecl] {
        &self.methods
    }

    fn members(&self) -> &[MemberDecl] {
        &self.members
    }

    fn construct(&self, ctor: usize, args: Vec<Value>) -> Result<Instance, CodeFault> {
        let body = self
            .ctor_bodies
            .get(ctor)
            .ok_or_else(|| CodeFault::new(format!("no constructor #{} on {}", ctor, self.name)))?;
        let mut fields = self.default_fields();
        body(&mut fields, args)?;
        Ok(Instance::new(NativeObject {
            fields: Mutex::new(fields),
        }))
    }

    fn call(
        &self,
        method: usize,
        this: Option<&Instance>,
        args: Vec<Value>,
    ) -> Result<Value, CodeFault> {
        match self.method_bodies.get(method) {
            Some(MethodBody::Static(body)) => body(args),
            Some(MethodBody::Instance(body)) => {
                let this = this.ok_or_else(|| {
                    CodeFault::new("instance method called without a receiver")
                })?;
                let object = self.object(this)?;
                let mut fields = object.fields.lock();
                body(&mut fields, args)
            }
            None => Err(CodeFault::new(format!(
                "no method #{} on {}",
                method, self.name
            ))),
        }
    }

    fn read(&self, member: usize, this: &Instance) -> Result<Value, CodeFault> {
        let decl = self
            .members
            .get(member)
            .ok_or_else(|| CodeFault::new(format!("no member #{} on {}", member, self.name)))?;
        let object = self.object(this)?;
        let fields = object.fields.lock();
        match &self.member_impls[member] {
            MemberImpl::Field { .. } => Ok(fields.get(&decl.name).cloned().unwrap_or_default()),
            MemberImpl::Property { get, .. } => get(&fields),
        }
    }

    fn write(&self, member: usize, this: &Instance, value: Value) -> Result<(), CodeFault> {
        let decl = self
            .members
            .get(member)
            .ok_or_else(|| CodeFault::new(format!("no member #{} on {}", member, self.name)))?;
        let object = self.object(this)?;
        let mut fields = object.fields.lock();
        match &self.member_impls[member] {
            MemberImpl::Field { .. } => {
                fields.insert(decl.name.clone(), value);
                Ok(())
            }
            MemberImpl::Property { set: Some(set), .. } => set(&mut fields, value),
            MemberImpl::Property { set: None, .. } => {
                Err(CodeFault::new(format!("property {} has no setter", decl.name)))
            }
        }
    }
}

/// Builder for a [`NativeUnit`]
pub struct NativeUnitBuilder {
    module: String,
    digest: Option<String>,
    types: Vec<NativeType>,
}

impl NativeUnitBuilder {
    pub fn with_type(mut self, ty: NativeType) -> Self {
        self.types.push(ty);
        self
    }

    /// Tag the unit with a content digest
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    pub fn build(self) -> LoadedCode {
        let types = self
            .types
            .into_iter()
            .map(|mut ty| {
                // A type without constructors gets an implicit public default one.
                if ty.constructors.is_empty() {
                    ty.constructors.push(ConstructorDecl::default());
                    ty.ctor_bodies
                        .push(Arc::new(|_: &mut Fields, _: Vec<Value>| Ok::<(), CodeFault>(())));
                }
                Arc::new(ty)
            })
            .collect();
        Arc::new(NativeUnit {
            module: self.module,
            digest: self.digest,
            types,
        })
    }
}

/// Unit code defined in Rust
pub struct NativeUnit {
    module: String,
    digest: Option<String>,
    types: Vec<Arc<NativeType>>,
}

impl NativeUnit {
    pub fn builder(module: &str) -> NativeUnitBuilder {
        NativeUnitBuilder {
            module: module.to_string(),
            digest: None,
            types: Vec::new(),
        }
    }
}

impl UnitCode for NativeUnit {
    fn module_name(&self) -> &str {
        &self.module
    }

    fn type_names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name.as_str()).collect()
    }

    fn resolve_type(&self, name: &str) -> Option<Arc<dyn TypeShape>> {
        self.types
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.clone() as Arc<dyn TypeShape>)
    }

    fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}
