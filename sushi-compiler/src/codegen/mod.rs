//! LLVM backend. One `Emitter` per compilation unit lowers the annotated
//! AST into an inkwell module. The symbol tables are sealed before this
//! runs; the emitter only reads them and its own caches.

mod builtins;
mod calls;
mod destructors;
mod expressions;
mod foreach;
mod functions;
mod layout;
mod pattern;
mod program;
mod runtime;
mod scopes;
mod statements;
mod strings;
mod types;

pub use layout::{align_of, enum_payload_size, size_of};
pub use scopes::ScopeStack;

use crate::context::CompilerContext;
use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::{FunctionValue, GlobalValue, PointerValue};
use std::collections::HashMap;
use sushi_ast::{Expression, Type};

/// Loop targets for `break` / `continue`.
pub(crate) struct LoopContext<'ctx> {
    pub continue_block: BasicBlock<'ctx>,
    pub break_block: BasicBlock<'ctx>,
}

pub struct Emitter<'ctx, 'sem> {
    pub context: &'ctx Context,
    pub module: Module<'ctx>,
    pub builder: Builder<'ctx>,
    pub(crate) sem: &'sem CompilerContext,

    /// LLVM struct types for nominal names, forward-declared opaque to
    /// break cycles
    pub(crate) named_types: HashMap<String, inkwell::types::StructType<'ctx>>,
    /// Deduplicated string-literal globals
    pub(crate) string_globals: HashMap<String, GlobalValue<'ctx>>,
    /// Declared libc externs
    pub(crate) externs: HashMap<&'static str, FunctionValue<'ctx>>,
    /// Emitted internal runtime helpers (concat, to_string, …)
    pub(crate) helpers: HashMap<String, FunctionValue<'ctx>>,
    /// Declared functions by symbol name
    pub(crate) functions: HashMap<String, FunctionValue<'ctx>>,
    /// Global constants
    pub(crate) globals: HashMap<String, (GlobalValue<'ctx>, Type)>,
    /// Locals of the function being emitted: stack slot + semantic type
    pub(crate) variables: HashMap<String, (PointerValue<'ctx>, Type)>,
    pub(crate) scopes: ScopeStack,
    pub(crate) loop_stack: Vec<LoopContext<'ctx>>,
    pub(crate) current_function: Option<FunctionValue<'ctx>>,
    /// The wrapped Result enum the current function returns
    pub(crate) current_return: Option<Type>,
}

impl<'ctx, 'sem> Emitter<'ctx, 'sem> {
    pub fn new(context: &'ctx Context, module_name: &str, sem: &'sem CompilerContext) -> Self {
        let module = context.create_module(module_name);
        let builder = context.create_builder();
        Self {
            context,
            module,
            builder,
            sem,
            named_types: HashMap::new(),
            string_globals: HashMap::new(),
            externs: HashMap::new(),
            helpers: HashMap::new(),
            functions: HashMap::new(),
            globals: HashMap::new(),
            variables: HashMap::new(),
            scopes: ScopeStack::new(),
            loop_stack: Vec::new(),
            current_function: None,
            current_return: None,
        }
    }

    /// The annotation the validator wrote; its absence past validation is a
    /// compiler bug.
    pub(crate) fn expr_type(&self, expr: &Expression) -> Result<Type, String> {
        expr.ty
            .clone()
            .ok_or_else(|| "internal: expression reached the emitter without a type".to_string())
    }

    /// Resolve interned nominal names through the sealed tables. Result
    /// sugar resolves to its concrete enum, which the monomorphizer is
    /// guaranteed to have installed.
    pub(crate) fn resolve(&self, ty: &Type) -> Type {
        let resolved = crate::semantics::resolve::resolve_type(self.sem, ty);
        if let Type::Result { ok, err } = &resolved {
            let mangled = sushi_ast::mangle_generic_name(
                "Result",
                &[(**ok).clone(), (**err).clone()],
            );
            if let Some(concrete) = self.sem.enums.get(&mangled) {
                return Type::Enum(concrete.clone());
            }
        }
        resolved
    }

    pub(crate) fn lookup_function(&self, name: &str) -> Result<FunctionValue<'ctx>, String> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| format!("internal: function `{}` was never declared", name))
    }

    /// A fresh basic block in the current function.
    pub(crate) fn append_block(&self, name: &str) -> Result<BasicBlock<'ctx>, String> {
        let function = self
            .current_function
            .ok_or_else(|| "internal: no current function".to_string())?;
        Ok(self.context.append_basic_block(function, name))
    }

    /// True when the current insertion block already ends in a terminator
    /// (a return or branch was emitted); further emission must stop.
    pub(crate) fn block_terminated(&self) -> bool {
        self.builder
            .get_insert_block()
            .and_then(|b| b.get_terminator())
            .is_some()
    }
}
