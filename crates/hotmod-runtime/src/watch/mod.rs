//! File watch bindings and the reload pipeline

mod binding;
mod reader;

pub use binding::{BindingContext, BindingState, ReloadOutcome, WatchBinding};
pub use reader::{digest, read_artifact};
