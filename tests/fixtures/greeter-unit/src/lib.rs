//! Native unit fixture
//!
//! The default build exports a `native_greeter` unit through
//! `declare_unit!`. The features build broken libraries instead.

use hotmod_kernel::native::{NativeMethod, NativeType, NativeUnit};
use hotmod_kernel::{LoadedCode, Value, ValueKind};

fn greeter_unit() -> LoadedCode {
    NativeUnit::builder("native_greeter")
        .with_type(
            NativeType::new("T")
                .with_field("calls", ValueKind::Int, 0)
                .with_method(NativeMethod::instance("greet", |fields, _| {
                    let calls = match fields.get("calls") {
                        Some(Value::Int(n)) => *n + 1,
                        _ => 1,
                    };
                    fields.insert("calls".to_string(), Value::Int(calls));
                    Ok(Value::from("hi from native"))
                })),
        )
        .build()
}

#[cfg(not(any(feature = "wrong-api", feature = "no-entry", feature = "bare")))]
hotmod_loaders::declare_unit!(greeter_unit());

#[cfg(feature = "wrong-api")]
#[unsafe(no_mangle)]
pub extern "C" fn _hotmod_api_version() -> u32 {
    hotmod_loaders::UNIT_API_VERSION + 1
}

#[cfg(feature = "wrong-api")]
#[unsafe(no_mangle)]
pub extern "C" fn _hotmod_unit_entry() -> *mut hotmod_loaders::dylib::ExportedCode {
    Box::into_raw(Box::new(greeter_unit()))
}

#[cfg(all(feature = "no-entry", not(feature = "wrong-api")))]
#[unsafe(no_mangle)]
pub extern "C" fn _hotmod_api_version() -> u32 {
    hotmod_loaders::UNIT_API_VERSION
}

#[cfg(all(feature = "bare", not(any(feature = "wrong-api", feature = "no-entry"))))]
#[unsafe(no_mangle)]
pub extern "C" fn hotmod_fixture_marker() -> u32 {
    7
}
