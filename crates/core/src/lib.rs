#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared models and logic for opcode-cache preloading and fleet coherence.

pub mod api;
pub mod config;
pub mod engine;
pub mod files;
pub mod manifest;
pub mod model;
pub mod reconcile;
pub mod resolve;
pub mod scan;

mod util;

pub use engine::{CompileOutcome, Engine, EngineError, MemoryRuntime, OpcacheRuntime};
pub use model::{DeclaredType, EngineSnapshot, RegistrySnapshot, SourceFile, TypeKind};
pub use resolve::AddressResolver;
pub use util::mtime_secs;
