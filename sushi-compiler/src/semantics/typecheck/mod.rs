//! The type validator: walks every function body, checks types, annotates
//! expression nodes, and rejects ill-typed programs with specific error
//! kinds. Visitors emit diagnostics and keep traversing, so one run
//! surfaces as many errors as possible.

mod calls;
mod compat;
mod expressions;
pub mod matching;
mod methods;
mod statements;

pub use compat::compatible;

use crate::context::CompilerContext;
use crate::semantics::resolve::resolve_type;
use crate::semantics::wrapped_return_type;
use std::collections::{HashMap, HashSet};
use sushi_ast::{mangle_generic_name, EnumType, FunctionDecl, Item, Program, Type};
use sushi_diagnostics::DiagnosticEngine;

pub struct TypeValidator<'a> {
    pub(crate) ctx: &'a mut CompilerContext,
    pub(crate) reporter: &'a mut DiagnosticEngine,
    /// Lexical scopes of variable types, innermost last
    pub(crate) scopes: Vec<HashMap<String, Type>>,
    /// Variables consumed by an explicit .destroy() call
    pub(crate) destroyed: HashSet<String>,
    /// The enclosing function's wrapped return enum
    pub(crate) current_return: Option<EnumType>,
    pub(crate) current_unit: String,
}

impl<'a> TypeValidator<'a> {
    pub fn new(ctx: &'a mut CompilerContext, reporter: &'a mut DiagnosticEngine) -> Self {
        Self {
            ctx,
            reporter,
            scopes: Vec::new(),
            destroyed: HashSet::new(),
            current_return: None,
            current_unit: String::new(),
        }
    }

    /// Validate every function body the emitter will compile. The bodies in
    /// `ctx.function_bodies` are the single source of truth; the program's
    /// items are synced into it first (the monomorphizer rewrote call sites
    /// in the program, not in the collector's early copies). New bodies may
    /// appear while validating (generic extension instantiation), so this
    /// loops until no unvalidated body remains.
    pub fn run(&mut self, program: &Program) {
        self.current_unit = program.unit.clone();
        self.sync_bodies(program);

        let mut validated: HashSet<String> = HashSet::new();
        loop {
            let next = self
                .ctx
                .function_bodies
                .keys()
                .find(|name| !validated.contains(*name))
                .cloned();
            let Some(name) = next else { break };
            validated.insert(name.clone());

            let Some(mut decl) = self.ctx.function_bodies.remove(&name) else {
                continue;
            };
            self.validate_function(&mut decl);
            self.ctx.function_bodies.insert(name, decl);
        }
    }

    fn sync_bodies(&mut self, program: &Program) {
        for item in &program.items {
            match item {
                Item::Function(decl) if !decl.is_generic() => {
                    self.ctx
                        .function_bodies
                        .insert(decl.name.clone(), decl.clone());
                }
                Item::Extend(decl) if decl.type_params.is_empty() => {
                    let key = decl.target.to_string();
                    for method in &decl.methods {
                        let symbol = match &decl.perk {
                            Some(perk) => {
                                crate::context::perk_method_symbol(&key, perk, &method.name)
                            }
                            None => crate::context::extension_symbol(&key, &method.name),
                        };
                        let mut compiled = method.clone();
                        compiled.name = symbol.clone();
                        self.ctx.function_bodies.insert(symbol, compiled);
                    }
                }
                _ => {}
            }
        }
    }

    fn validate_function(&mut self, decl: &mut FunctionDecl) {
        self.scopes.clear();
        self.destroyed.clear();
        self.push_scope();

        for param in &decl.params {
            let ty = resolve_type(self.ctx, &param.ty);
            self.declare_var(&param.name, ty);
        }

        self.current_return = self.result_enum_of(&wrapped_return_type(decl));

        let mut body = std::mem::take(&mut decl.body);
        self.validate_block(&mut body);
        decl.body = body;

        self.pop_scope();
    }

    // -----------------------------------------------------------
    // Scope helpers
    // -----------------------------------------------------------

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn declare_var(&mut self, name: &str, ty: Type) {
        self.destroyed.remove(name);
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ty);
        }
    }

    pub(crate) fn lookup_var(&self, name: &str) -> Option<&Type> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub(crate) fn visible_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .scopes
            .iter()
            .flat_map(|scope| scope.keys().cloned())
            .collect();
        names.extend(self.ctx.constants.keys().cloned());
        names
    }

    // -----------------------------------------------------------
    // Type shape helpers
    // -----------------------------------------------------------

    /// The concrete enum behind a Result-sugar or enum type, if any.
    pub(crate) fn result_enum_of(&self, ty: &Type) -> Option<EnumType> {
        match ty {
            Type::Result { ok, err } => {
                let ok = resolve_type(self.ctx, ok);
                let err = resolve_type(self.ctx, err);
                let mangled = mangle_generic_name("Result", &[ok, err]);
                self.ctx.enums.get(&mangled).cloned()
            }
            Type::Enum(e) if e.is_result_shaped() => Some(e.clone()),
            _ => None,
        }
    }

    /// True for types that may appear inside a string interpolation:
    /// primitive numbers, bool, and string.
    pub(crate) fn is_stringifiable(&self, ty: &Type) -> bool {
        ty.is_numeric() || ty.is_bool() || ty.is_string()
    }

    /// Is `ty` (or its resolution) a Result-shaped enum?
    pub(crate) fn is_result_shaped(&self, ty: &Type) -> bool {
        match ty {
            Type::Result { .. } => true,
            Type::Enum(e) => e.is_result_shaped(),
            _ => false,
        }
    }
}
