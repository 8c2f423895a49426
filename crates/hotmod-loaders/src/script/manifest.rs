//! Unit manifest format
//!
//! ```toml
//! module = "greeter"
//! script = '''
//! fn init(name) { this.name = name; }
//! fn greet() { "hi " + this.name }
//! '''
//!
//! [[types]]
//! name = "T"
//! fields = [{ name = "name", type = "string", default = "world" }]
//! constructors = [{ function = "init", params = [{ name = "name", type = "string" }] }]
//! methods = [{ name = "Greet", function = "greet", returns = "string" }]
//! ```

use hotmod_kernel::{ParamDecl, Value, ValueKind, Visibility};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitManifest {
    /// Module name the unit declares
    pub module: String,
    /// Rhai source holding every function the types reference
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub types: Vec<TypeManifest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeManifest {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldManifest>,
    #[serde(default)]
    pub properties: Vec<PropertyManifest>,
    #[serde(default)]
    pub constructors: Vec<ConstructorManifest>,
    #[serde(default)]
    pub methods: Vec<MethodManifest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldManifest {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ValueKind,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyManifest {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ValueKind,
    /// Getter function, called with `this` and no arguments
    pub get: String,
    /// Setter function, called with `this` and the new value
    #[serde(default)]
    pub set: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConstructorManifest {
    /// Initialiser called with `this` bound to the fresh field map
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodManifest {
    pub name: String,
    /// Script function; defaults to the method name
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub returns: ValueKind,
    #[serde(rename = "static", default)]
    pub is_static: bool,
    #[serde(default)]
    pub visibility: Visibility,
}

impl MethodManifest {
    pub fn function_name(&self) -> &str {
        self.function.as_deref().unwrap_or(&self.name)
    }
}
