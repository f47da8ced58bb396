use thiserror::Error;

/// Internal compiler errors: bugs in the compiler itself, never user
/// diagnostics. These abort the current compilation.
#[derive(Debug, Error)]
pub enum IceError {
    #[error("internal compiler error: {0}")]
    Message(String),

    #[error("internal compiler error: unresolved type `{0}` reached the emitter")]
    UnresolvedType(String),

    #[error("internal compiler error: missing annotation on {0}")]
    MissingAnnotation(&'static str),
}

impl IceError {
    pub fn msg(message: impl Into<String>) -> Self {
        IceError::Message(message.into())
    }
}

/// Errors surfaced by the backend. Builder failures carry the formatted
/// inkwell error; verification failures carry LLVM's verifier output.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("LLVM emission failed: {0}")]
    Emit(String),

    #[error("module verification failed: {0}")]
    Verify(String),

    #[error("target machine error: {0}")]
    Target(String),

    #[error(transparent)]
    Ice(#[from] IceError),
}

impl From<String> for CodegenError {
    fn from(message: String) -> Self {
        CodegenError::Emit(message)
    }
}
