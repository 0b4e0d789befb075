//! The embedding surface: `Runtime` (heap + interned-string table) and
//! `Context` (VM + global object), plus the unified `EngineError` model
//! that folds GC, bytecode, compiler, parser, and VM failures into seven
//! error codes.

mod config;
mod context;
mod error;
mod runtime;

pub use config::RuntimeConfig;
pub use context::Context;
pub use error::{EngineError, EngineResult, ErrorCode};
pub use runtime::Runtime;

// Re-exported so a host driving the embedding API never has to depend on
// `embr-value`/`embr-gc` directly for the types that cross the boundary.
pub use embr_gc::{GcCycleReport, GcRef, GcStats};
pub use embr_value::{FunctionKind, JsArray, JsFunction, JsObject, JsString, NativeContext, NativeFn, Value};
