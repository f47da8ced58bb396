pub mod codegen; // LLVM lowering (types, emitter, destructors, builtin runtime)
pub mod context; // Symbol tables / compilation context
pub mod error; // Internal (non-diagnostic) error types
pub mod semantics; // Collect, resolve, monomorphize, const-eval, typecheck, borrow
pub mod slib; // .slib library manifest

// Re-export diagnostics from sushi-diagnostics crate
pub use sushi_diagnostics as diagnostics;

pub use codegen::Emitter;
pub use context::CompilerContext;
pub use diagnostics::{codes, Diagnostic, DiagnosticEngine, Severity, Span};
pub use error::{CodegenError, IceError};
pub use semantics::run_semantic_pipeline;
