//! Script units
//!
//! An artifact is a UTF-8 TOML [`UnitManifest`] carrying a Rhai source and
//! the type declarations that map constructors, methods and properties onto
//! script functions. The source is compiled once per load; every object
//! keeps its fields in a Rhai map bound as `this` while its functions run.

pub mod convert;
pub mod manifest;

use hotmod_kernel::{
    CodeFault, ConstructorDecl, Instance, LoadError, LoadedCode, MemberDecl, MemberKind,
    MethodDecl, ModuleLoader, TypeShape, UnitCode, Value,
};
use parking_lot::Mutex;
use rhai::{AST, CallFnOptions, Dynamic, Engine, Map, Scope};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::content_digest;
use convert::{dynamic_to_value, value_to_dynamic};
pub use manifest::UnitManifest;
use manifest::TypeManifest;

/// Resource limits applied to script execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum operations per call
    pub max_operations: u64,
    /// Maximum function call depth
    pub max_call_levels: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_string_size: usize,
    pub allow_loops: bool,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 64,
            max_array_size: 10_000,
            max_map_size: 10_000,
            max_string_size: 1_000_000,
            allow_loops: true,
        }
    }
}

impl ScriptLimits {
    fn apply(&self, engine: &mut Engine) {
        engine.set_max_operations(self.max_operations);
        engine.set_max_call_levels(self.max_call_levels);
        engine.set_max_array_size(self.max_array_size);
        engine.set_max_map_size(self.max_map_size);
        engine.set_max_string_size(self.max_string_size);
        if !self.allow_loops {
            engine.set_allow_looping(false);
        }
    }
}

/// Reasons a manifest is rejected; all surface as [`LoadError::Malformed`]
#[derive(Debug, thiserror::Error)]
enum ManifestError {
    #[error("artifact is not UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("invalid manifest: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("script does not compile: {0}")]
    Compile(String),

    #[error("module name is empty")]
    EmptyModule,

    #[error("type {0} is declared more than once")]
    DuplicateType(String),

    #[error("type {type_name} declares {member} more than once")]
    DuplicateMember { type_name: String, member: String },

    #[error("{owner} references missing script function {function}/{arity}")]
    MissingFunction {
        owner: String,
        function: String,
        arity: usize,
    },

    #[error("{owner} references {function} with {arity} parameter(s), script defines {defined:?}")]
    ArityMismatch {
        owner: String,
        function: String,
        arity: usize,
        defined: Vec<usize>,
    },
}

impl From<ManifestError> for LoadError {
    fn from(err: ManifestError) -> Self {
        LoadError::Malformed(err.to_string())
    }
}

/// Loader for TOML + Rhai unit manifests
pub struct ScriptLoader {
    engine: Arc<Engine>,
    limits: ScriptLimits,
}

impl ScriptLoader {
    pub fn new() -> Self {
        Self::with_limits(ScriptLimits::default())
    }

    pub fn with_limits(limits: ScriptLimits) -> Self {
        let mut engine = Engine::new();
        limits.apply(&mut engine);
        engine.on_print(|text| info!("Script print: {}", text));
        engine.on_debug(|text, source, pos| {
            debug!("Script debug {:?} @ {}: {}", source, pos, text)
        });
        Self {
            engine: Arc::new(engine),
            limits,
        }
    }

    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }

    /// Parse a manifest without compiling its script
    pub fn parse(&self, bytes: &[u8]) -> Result<UnitManifest, LoadError> {
        let text = std::str::from_utf8(bytes).map_err(ManifestError::from)?;
        let manifest: UnitManifest = toml::from_str(text).map_err(ManifestError::from)?;
        Ok(manifest)
    }

    fn build(&self, manifest: UnitManifest, digest: String) -> Result<ScriptUnit, ManifestError> {
        if manifest.module.trim().is_empty() {
            return Err(ManifestError::EmptyModule);
        }
        let ast = self
            .engine
            .compile(&manifest.script)
            .map_err(|e| ManifestError::Compile(e.to_string()))?;

        let mut arities: HashMap<String, Vec<usize>> = HashMap::new();
        for f in ast.iter_functions() {
            arities
                .entry(f.name.to_string())
                .or_default()
                .push(f.params.len());
        }
        let ast = Arc::new(ast);

        let mut seen = HashSet::new();
        let mut types = Vec::with_capacity(manifest.types.len());
        for ty in manifest.types {
            if !seen.insert(ty.name.clone()) {
                return Err(ManifestError::DuplicateType(ty.name));
            }
            types.push(Arc::new(ScriptType::build(
                ty,
                &arities,
                self.engine.clone(),
                ast.clone(),
            )?));
        }

        Ok(ScriptUnit {
            module: manifest.module,
            digest,
            types,
        })
    }
}

impl Default for ScriptLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for ScriptLoader {
    fn load(&self, bytes: &[u8]) -> Result<LoadedCode, LoadError> {
        let digest = content_digest(bytes);
        let manifest = self.parse(bytes).inspect_err(|e| warn!("Rejected script unit: {}", e))?;
        let unit = self.build(manifest, digest).map_err(|e| {
            warn!("Rejected script unit: {}", e);
            LoadError::from(e)
        })?;
        debug!(
            "Loaded script unit {} ({} type(s), digest {})",
            unit.module,
            unit.types.len(),
            &unit.digest[..12]
        );
        Ok(Arc::new(unit))
    }

    fn kind(&self) -> &'static str {
        "script"
    }
}

fn require_function(
    arities: &HashMap<String, Vec<usize>>,
    owner: String,
    function: &str,
    arity: usize,
) -> Result<String, ManifestError> {
    match arities.get(function) {
        Some(defined) if defined.contains(&arity) => Ok(function.to_string()),
        Some(defined) => Err(ManifestError::ArityMismatch {
            owner,
            function: function.to_string(),
            arity,
            defined: defined.clone(),
        }),
        None => Err(ManifestError::MissingFunction {
            owner,
            function: function.to_string(),
            arity,
        }),
    }
}

enum ScriptMember {
    Field { default: Value },
    Property { get: String, set: Option<String> },
}

/// Field storage of a script object: a Rhai map bound as `this`
struct ScriptObject {
    this: Mutex<Dynamic>,
}

/// One type declared by a manifest
pub struct ScriptType {
    name: String,
    engine: Arc<Engine>,
    ast: Arc<AST>,
    constructors: Vec<ConstructorDecl>,
    ctor_functions: Vec<Option<String>>,
    methods: Vec<MethodDecl>,
    method_functions: Vec<String>,
    members: Vec<MemberDecl>,
    member_impls: Vec<ScriptMember>,
}

impl ScriptType {
    fn build(
        ty: TypeManifest,
        arities: &HashMap<String, Vec<usize>>,
        engine: Arc<Engine>,
        ast: Arc<AST>,
    ) -> Result<Self, ManifestError> {
        let mut built = Self {
            name: ty.name.clone(),
            engine,
            ast,
            constructors: Vec::new(),
            ctor_functions: Vec::new(),
            methods: Vec::new(),
            method_functions: Vec::new(),
            members: Vec::new(),
            member_impls: Vec::new(),
        };

        let mut field_names = HashSet::new();
        for field in ty.fields {
            if !field_names.insert(field.name.clone()) {
                return Err(ManifestError::DuplicateMember {
                    type_name: ty.name,
                    member: field.name,
                });
            }
            built.members.push(MemberDecl {
                name: field.name,
                ty: field.kind,
                kind: MemberKind::Field,
                visibility: field.visibility,
                writable: true,
            });
            built.member_impls.push(ScriptMember::Field {
                default: field.default,
            });
        }

        let mut property_names = HashSet::new();
        for prop in ty.properties {
            if !property_names.insert(prop.name.clone()) {
                return Err(ManifestError::DuplicateMember {
                    type_name: ty.name,
                    member: prop.name,
                });
            }
            let owner = format!("{}.{}", ty.name, prop.name);
            let get = require_function(arities, owner.clone(), &prop.get, 0)?;
            let set = prop
                .set
                .as_deref()
                .map(|f| require_function(arities, owner.clone(), f, 1))
                .transpose()?;
            built.members.push(MemberDecl {
                name: prop.name,
                ty: prop.kind,
                kind: MemberKind::Property,
                visibility: prop.visibility,
                writable: set.is_some(),
            });
            built.member_impls.push(ScriptMember::Property { get, set });
        }

        let mut ctors = ty.constructors;
        if ctors.is_empty() {
            ctors.push(Default::default());
        }
        for ctor in ctors {
            let function = match &ctor.function {
                Some(f) => Some(require_function(
                    arities,
                    format!("{} constructor", ty.name),
                    f,
                    ctor.params.len(),
                )?),
                None => None,
            };
            built.constructors.push(ConstructorDecl {
                params: ctor.params,
                visibility: ctor.visibility,
            });
            built.ctor_functions.push(function);
        }

        for method in ty.methods {
            let function = require_function(
                arities,
                format!("{}.{}", ty.name, method.name),
                method.function_name(),
                method.params.len(),
            )?;
            built.methods.push(MethodDecl {
                name: method.name,
                params: method.params,
                returns: method.returns,
                is_static: method.is_static,
                visibility: method.visibility,
            });
            built.method_functions.push(function);
        }

        Ok(built)
    }

    fn run(
        &self,
        function: &str,
        this: Option<&mut Dynamic>,
        args: Vec<Value>,
    ) -> Result<Value, CodeFault> {
        let args: Vec<Dynamic> = args.iter().map(value_to_dynamic).collect();
        let mut scope = Scope::new();
        let mut options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        if let Some(this) = this {
            options = options.bind_this_ptr(this);
        }
        let result: Dynamic = self
            .engine
            .call_fn_with_options(options, &mut scope, &self.ast, function, args)
            .map_err(|e| CodeFault::new(e.to_string()))?;
        Ok(dynamic_to_value(&result))
    }

    fn object<'a>(&self, this: &'a Instance) -> Result<&'a ScriptObject, CodeFault> {
        this.state::<ScriptObject>().ok_or_else(|| {
            CodeFault::new(format!("instance was not created by script type {}", self.name))
        })
    }

    fn field_map(&self) -> Map {
        let mut map = Map::new();
        for (decl, imp) in self.members.iter().zip(&self.member_impls) {
            if let ScriptMember::Field { default } = imp {
                map.insert(decl.name.as_str().into(), value_to_dynamic(default));
            }
        }
        map
    }
}

fn field_of(this: &Dynamic, name: &str) -> Result<Value, CodeFault> {
    let map = this
        .read_lock::<Map>()
        .ok_or_else(|| CodeFault::new("object state is no longer a map"))?;
    Ok(map.get(name).map(dynamic_to_value).unwrap_or_default())
}

impl TypeShape for ScriptType {
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
        let function = self
            .ctor_functions
            .get(ctor)
            .ok_or_else(|| CodeFault::new(format!("no constructor #{} on {}", ctor, self.name)))?;
        let mut this = Dynamic::from_map(self.field_map());
        if let Some(function) = function {
            self.run(function, Some(&mut this), args)?;
        }
        Ok(Instance::new(ScriptObject {
            this: Mutex::new(this),
        }))
    }

    fn call(
        &self,
        method: usize,
        this: Option<&Instance>,
        args: Vec<Value>,
    ) -> Result<Value, CodeFault> {
        let (decl, function) = self
            .methods
            .get(method)
            .zip(self.method_functions.get(method))
            .ok_or_else(|| CodeFault::new(format!("no method #{} on {}", method, self.name)))?;
        if decl.is_static {
            return self.run(function, None, args);
        }
        let this = this.ok_or_else(|| CodeFault::new("instance method called without a receiver"))?;
        let object = self.object(this)?;
        let mut state = object.this.lock();
        self.run(function, Some(&mut *state), args)
    }

    fn read(&self, member: usize, this: &Instance) -> Result<Value, CodeFault> {
        let decl = self
            .members
            .get(member)
            .ok_or_else(|| CodeFault::new(format!("no member #{} on {}", member, self.name)))?;
        let object = self.object(this)?;
        let mut state = object.this.lock();
        match &self.member_impls[member] {
            ScriptMember::Field { .. } => field_of(&*state, &decl.name),
            ScriptMember::Property { get, .. } => self.run(get, Some(&mut *state), Vec::new()),
        }
    }

    fn write(&self, member: usize, this: &Instance, value: Value) -> Result<(), CodeFault> {
        let decl = self
            .members
            .get(member)
            .ok_or_else(|| CodeFault::new(format!("no member #{} on {}", member, self.name)))?;
        let object = self.object(this)?;
        let mut state = object.this.lock();
        match &self.member_impls[member] {
            ScriptMember::Field { .. } => {
                let mut map = state
                    .write_lock::<Map>()
                    .ok_or_else(|| CodeFault::new("object state is no longer a map"))?;
                map.insert(decl.name.as_str().into(), value_to_dynamic(&value));
                Ok(())
            }
            ScriptMember::Property { set: Some(set), .. } => {
                self.run(set, Some(&mut *state), vec![value]).map(|_| ())
            }
            ScriptMember::Property { set: None, .. } => Err(CodeFault::new(format!(
                "property {} has no setter",
                decl.name
            ))),
        }
    }
}

/// Code produced by [`ScriptLoader`]
pub struct ScriptUnit {
    module: String,
    digest: String,
    types: Vec<Arc<ScriptType>>,
}

impl UnitCode for ScriptUnit {
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
        Some(&self.digest)
    }
}
