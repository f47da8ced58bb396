//! Built-in method emission. The validator recorded the dispatch
//! route on every method call; this module routes to the per-receiver
//! emitters, which inline the full IR — no stdlib call is involved.

mod hash;
mod hashmap;
mod io;
mod own;
mod result_maybe;
mod sequences;
mod string_methods;

use super::Emitter;
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, FunctionValue};
use sushi_ast::{BuiltinKind, ExprKind, Expression, MethodDispatch, Type};

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_method_call(
        &mut self,
        expr: &Expression,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let ExprKind::MethodCall {
            receiver,
            method,
            args,
            inferred_return_type,
            dispatch,
        } = &expr.kind
        else {
            unreachable!()
        };
        let dispatch = dispatch
            .clone()
            .ok_or("internal: method call without dispatch annotation")?;
        let return_ty = inferred_return_type
            .clone()
            .ok_or("internal: method call without return annotation")?;

        match dispatch {
            MethodDispatch::Extension(symbol) => {
                self.emit_compiled_method_call(&symbol, receiver, args)
            }
            MethodDispatch::Perk(perk) => {
                let receiver_ty = self.expr_type(receiver)?;
                let key = receiver_ty.unwrap_reference().to_string();
                let symbol = crate::context::perk_method_symbol(&key, &perk, method);
                self.emit_compiled_method_call(&symbol, receiver, args)
            }
            MethodDispatch::AutoHash => {
                let ty = self.expr_type(receiver)?;
                let ty = self.resolve(ty.unwrap_reference());
                let value = self.emit_expression(receiver)?;
                Ok(self.emit_hash_value(value, &ty)?.into())
            }
            MethodDispatch::BuiltinPrimitive | MethodDispatch::BuiltinGeneric => {
                self.emit_builtin_method(receiver, method, args, &return_ty)
            }
        }
    }

    /// Extension and perk methods compile as plain functions; the receiver
    /// is the first argument, by reference when the signature says so.
    fn emit_compiled_method_call(
        &mut self,
        symbol: &str,
        receiver: &Expression,
        args: &[Expression],
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let sig = self
            .sem
            .functions
            .get(symbol)
            .ok_or_else(|| format!("internal: method symbol `{}` missing", symbol))?
            .clone();
        let function = self.lookup_function(symbol)?;

        let mut call_args: Vec<BasicMetadataValueEnum> = Vec::with_capacity(args.len() + 1);
        let wants_ref = matches!(
            sig.params.first().map(|p| &p.ty),
            Some(Type::Reference { .. })
        );
        if wants_ref {
            let (ptr, _) = self.emit_place(receiver)?;
            call_args.push(ptr.into());
        } else {
            call_args.push(self.emit_expression(receiver)?.into());
        }
        for arg in args {
            call_args.push(self.emit_expression(arg)?.into());
        }

        self.builder
            .build_call(function, &call_args, &format!("{}_call", symbol))
            .map_err(|e| e.to_string())?
            .try_as_basic_value()
            .basic()
            .ok_or_else(|| format!("internal: `{}` returned void", symbol))
    }

    fn emit_builtin_method(
        &mut self,
        receiver: &Expression,
        method: &str,
        args: &[Expression],
        return_ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let receiver_ty = self.expr_type(receiver)?;
        let receiver_ty = self.resolve(receiver_ty.unwrap_reference());

        match &receiver_ty {
            Type::Builtin(BuiltinKind::String) => {
                self.emit_string_method(receiver, method, args, return_ty)
            }
            Type::Builtin(BuiltinKind::Stdin)
            | Type::Builtin(BuiltinKind::Stdout)
            | Type::Builtin(BuiltinKind::Stderr)
            | Type::Builtin(BuiltinKind::File) => {
                self.emit_io_method(receiver, &receiver_ty, method, args)
            }
            Type::Enum(e) if e.is_result_shaped() || e.is_maybe_shaped() => {
                self.emit_result_maybe_method(receiver, e, method, args, return_ty)
            }
            Type::Struct(s) if s.is_monomorph_of("Own") => {
                self.emit_own_method(receiver, s, method)
            }
            Type::Struct(s) if s.is_monomorph_of("HashMap") => {
                self.emit_hashmap_method(receiver, s, method, args, return_ty)
            }
            Type::Struct(s) if s.is_monomorph_of("List") => {
                self.emit_sequence_method(receiver, &receiver_ty, method, args, return_ty)
            }
            Type::DynArray { .. } | Type::Array { .. } => {
                self.emit_sequence_method(receiver, &receiver_ty, method, args, return_ty)
            }
            other => Err(format!(
                "internal: no builtin method `{}` on `{}`",
                method, other
            )),
        }
    }

    /// The unit value methods with no interesting result return.
    pub(crate) fn unit_value(&self) -> BasicValueEnum<'ctx> {
        self.context.i8_type().const_zero().into()
    }

    /// Mark an explicitly destroyed receiver so scope exit skips it
    /// (one destructor per value).
    pub(crate) fn note_destroyed(&mut self, receiver: &Expression) {
        if let ExprKind::Name(name) = &receiver.kind {
            self.scopes.mark_cleaned(name);
        }
    }

    /// Define (once) an internal helper function with an explicit
    /// signature; used by the container runtimes for per-monomorph code.
    pub(crate) fn define_helper<F>(
        &mut self,
        name: &str,
        fn_type: inkwell::types::FunctionType<'ctx>,
        build: F,
    ) -> Result<FunctionValue<'ctx>, String>
    where
        F: FnOnce(&mut Self, FunctionValue<'ctx>) -> Result<(), String>,
    {
        if let Some(f) = self.helpers.get(name) {
            return Ok(*f);
        }
        let saved_block = self.builder.get_insert_block();
        let saved_fn = self.current_function;

        let function =
            self.module
                .add_function(name, fn_type, Some(inkwell::module::Linkage::Internal));
        self.helpers.insert(name.to_string(), function);
        self.current_function = Some(function);
        build(self, function)?;

        self.current_function = saved_fn;
        if let Some(block) = saved_block {
            self.builder.position_at_end(block);
        }
        Ok(function)
    }
}
