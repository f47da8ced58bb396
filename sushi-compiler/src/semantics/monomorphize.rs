//! Monomorphization: producing concrete enums, structs, functions and
//! extension methods from their generic templates.
//!
//! Instantiation requests come from every declared type in the program and
//! the tables; nested generics re-queue through recursion and run to fixed
//! point. Each `(base, canonical args)` pair produces exactly one concrete
//! entry, keyed by its mangled name.

use crate::context::{CompilerContext, ExtensionMethod, FunctionSig, PerkImpl};
use crate::semantics::resolve::resolve_type;
use crate::semantics::wrapped_return_type;
use log::debug;
use std::collections::HashMap;
use sushi_ast::{
    mangle_function_name, mangle_generic_name, Block, EnumType, EnumVariant, ExprKind, Expression,
    FunctionDecl, Item, Param, Pattern, Program, Statement, StructType, Type,
};
use sushi_diagnostics::{codes, DiagnosticEngine, Span};

/// Maximum nesting depth for generic instantiation. Deeply recursive
/// instantiations past this point are compile errors, not stack overflows.
pub(crate) const MAX_GENERIC_DEPTH: usize = 64;

pub struct Monomorphizer<'a> {
    ctx: &'a mut CompilerContext,
    reporter: &'a mut DiagnosticEngine,
}

impl<'a> Monomorphizer<'a> {
    pub fn new(ctx: &'a mut CompilerContext, reporter: &'a mut DiagnosticEngine) -> Self {
        Self { ctx, reporter }
    }

    // ---------------------------------------------------------------
    // Type instantiation
    // ---------------------------------------------------------------

    /// Walk every declared type in the unit and the tables, instantiating
    /// each generic use. Runs to fixed point through recursion.
    pub fn run_types(&mut self, program: &Program) {
        // Function signatures (user + stdlib) — every wrapped Result return
        // needs its concrete enum.
        let sig_types: Vec<Type> = self
            .ctx
            .functions
            .values()
            .flat_map(|sig| {
                sig.params
                    .iter()
                    .map(|p| p.ty.clone())
                    .chain(std::iter::once(sig.return_type.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for ty in &sig_types {
            self.request_type(ty, &Span::synthetic());
        }

        let const_types: Vec<Type> = self.ctx.constants.values().map(|c| c.ty.clone()).collect();
        for ty in &const_types {
            self.request_type(ty, &Span::synthetic());
        }

        let struct_field_types: Vec<Type> = self
            .ctx
            .structs
            .values()
            .flat_map(|s| s.fields.iter().map(|(_, t)| t.clone()).collect::<Vec<_>>())
            .collect();
        for ty in &struct_field_types {
            self.request_type(ty, &Span::synthetic());
        }

        let enum_payload_types: Vec<Type> = self
            .ctx
            .enums
            .values()
            .flat_map(|e| {
                e.variants
                    .iter()
                    .flat_map(|v| v.associated_types.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        for ty in &enum_payload_types {
            self.request_type(ty, &Span::synthetic());
        }

        for item in &program.items {
            match item {
                Item::Function(decl) if !decl.is_generic() => {
                    self.request_block(&decl.body);
                }
                Item::Extend(decl) if decl.type_params.is_empty() => {
                    for method in &decl.methods {
                        self.request_block(&method.body);
                    }
                }
                _ => {}
            }
        }
    }

    fn request_block(&mut self, block: &Block) {
        for stmt in &block.statements {
            self.request_statement(stmt);
        }
    }

    fn request_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Let(s) => {
                self.request_type(&s.declared_type, &s.span);
                if let Some(init) = &s.init {
                    self.request_expression(init);
                }
            }
            Statement::Rebind(s) => {
                self.request_expression(&s.target);
                self.request_expression(&s.value);
            }
            Statement::Return(s) => {
                if let Some(value) = &s.value {
                    self.request_expression(value);
                }
            }
            Statement::If(s) => {
                self.request_expression(&s.condition);
                self.request_block(&s.then_block);
                if let Some(else_block) = &s.else_block {
                    self.request_block(else_block);
                }
            }
            Statement::While(s) => {
                self.request_expression(&s.condition);
                self.request_block(&s.body);
            }
            Statement::Foreach(s) => {
                if let Some(ty) = &s.declared_item_type {
                    self.request_type(ty, &s.span);
                }
                self.request_expression(&s.iterable);
                self.request_block(&s.body);
            }
            Statement::Match(s) => {
                self.request_expression(&s.scrutinee);
                for arm in &s.arms {
                    self.request_block(&arm.body);
                }
            }
            Statement::Print(s) => self.request_expression(&s.value),
            Statement::Expr(s) => self.request_expression(&s.expr),
            Statement::Break(_) | Statement::Continue(_) => {}
        }
    }

    fn request_expression(&mut self, expr: &Expression) {
        match &expr.kind {
            ExprKind::Cast { expr: inner, target } => {
                self.request_type(target, &expr.span);
                self.request_expression(inner);
            }
            ExprKind::DynArrayNew { element_type } => {
                self.request_type(element_type, &expr.span);
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.request_expression(lhs);
                self.request_expression(rhs);
            }
            ExprKind::Unary { expr: inner, .. } | ExprKind::Borrow { expr: inner, .. } => {
                self.request_expression(inner);
            }
            ExprKind::Call { args, .. } | ExprKind::DotCall { args, .. } => {
                for arg in args {
                    self.request_expression(arg);
                }
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                self.request_expression(receiver);
                for arg in args {
                    self.request_expression(arg);
                }
            }
            ExprKind::EnumConstructor { args, .. } => {
                for arg in args {
                    self.request_expression(arg);
                }
            }
            ExprKind::StructConstructor { args, .. } => {
                for arg in args {
                    self.request_expression(&arg.value);
                }
            }
            ExprKind::MemberAccess { object, .. } => self.request_expression(object),
            ExprKind::IndexAccess { object, index } => {
                self.request_expression(object);
                self.request_expression(index);
            }
            ExprKind::ArrayLiteral(items) | ExprKind::DynArrayFrom(items) => {
                for item in items {
                    self.request_expression(item);
                }
            }
            ExprKind::InterpolatedString(parts) => {
                for part in parts {
                    if let sushi_ast::InterpolationPart::Expr(e) = part {
                        self.request_expression(e);
                    }
                }
            }
            ExprKind::Range { start, end, .. } => {
                self.request_expression(start);
                self.request_expression(end);
            }
            ExprKind::Try { inner, .. } => self.request_expression(inner),
            _ => {}
        }
    }

    /// Request instantiation of every generic use inside `ty`.
    fn request_type(&mut self, ty: &Type, span: &Span) {
        self.request_type_at_depth(ty, span, 0);
    }

    fn request_type_at_depth(&mut self, ty: &Type, span: &Span, depth: usize) {
        if depth > MAX_GENERIC_DEPTH {
            self.reporter.emit_error(
                codes::CE2047,
                format!(
                    "generic instantiation of `{}` exceeds the maximum nesting depth",
                    ty
                ),
                span.clone(),
            );
            return;
        }
        match ty {
            Type::GenericRef { base, args } => {
                for arg in args {
                    self.request_type_at_depth(arg, span, depth + 1);
                }
                self.ensure_instantiated(base, args, span, depth);
            }
            Type::Result { ok, err } => {
                self.request_type_at_depth(ok, span, depth + 1);
                self.request_type_at_depth(err, span, depth + 1);
                self.ensure_instantiated("Result", &[(**ok).clone(), (**err).clone()], span, depth);
            }
            Type::Array { base, .. } | Type::DynArray { base } => {
                self.request_type_at_depth(base, span, depth + 1)
            }
            Type::Reference { inner, .. } => self.request_type_at_depth(inner, span, depth + 1),
            Type::Pointer { pointee } => self.request_type_at_depth(pointee, span, depth + 1),
            Type::Iterator { element } => self.request_type_at_depth(element, span, depth + 1),
            _ => {}
        }
    }

    /// Instantiate `base<args…>` if it is not already in the concrete
    /// tables. Returns the concrete type. Memoized by mangled name.
    pub fn ensure_instantiated(
        &mut self,
        base: &str,
        args: &[Type],
        span: &Span,
        depth: usize,
    ) -> Option<Type> {
        // Canonicalize: arguments resolve before mangling so every spelling
        // of the same instantiation shares one identity.
        let resolved_args: Vec<Type> = args.iter().map(|a| resolve_type(self.ctx, a)).collect();
        if resolved_args.iter().any(Type::contains_unresolved) {
            // Still depends on an uninstantiated generic or a type
            // parameter; the caller requeues once those are concrete.
            return None;
        }

        if let Some(existing) = self.ctx.monomorph(base, &resolved_args) {
            return Some(existing);
        }

        if let Some(template) = self.ctx.generic_enums.get(base).cloned() {
            if !self.check_arity_and_bounds(base, &template.type_params, &resolved_args, span) {
                return None;
            }
            let subst = build_substitution(&template.type_params, &resolved_args);
            let name = mangle_generic_name(base, &resolved_args);
            let variants: Vec<EnumVariant> = template
                .variants
                .iter()
                .map(|v| EnumVariant {
                    name: v.name.clone(),
                    associated_types: v
                        .associated_types
                        .iter()
                        .map(|t| substitute(t, &subst))
                        .collect(),
                })
                .collect();

            // Nested generics inside the payload re-queue here.
            for variant in &variants {
                for ty in &variant.associated_types {
                    self.request_type_at_depth(ty, span, depth + 1);
                }
            }
            let variants = variants
                .into_iter()
                .map(|v| EnumVariant {
                    name: v.name,
                    associated_types: v
                        .associated_types
                        .iter()
                        .map(|t| resolve_type(self.ctx, t))
                        .collect(),
                })
                .collect();

            let concrete = EnumType {
                name: name.clone(),
                variants,
                generic_base: Some(base.to_string()),
                generic_args: Some(resolved_args.clone()),
            };
            debug!("monomorphize enum {}", name);
            self.ctx.install_enum(concrete.clone());
            return Some(Type::Enum(concrete));
        }

        if let Some(template) = self.ctx.generic_structs.get(base).cloned() {
            if !self.check_arity_and_bounds(base, &template.type_params, &resolved_args, span) {
                return None;
            }
            let subst = build_substitution(&template.type_params, &resolved_args);
            let name = mangle_generic_name(base, &resolved_args);
            let fields: Vec<(String, Type)> = template
                .fields
                .iter()
                .map(|(field_name, t)| (field_name.clone(), substitute(t, &subst)))
                .collect();

            for (_, ty) in &fields {
                self.request_type_at_depth(ty, span, depth + 1);
            }
            let fields = fields
                .into_iter()
                .map(|(field_name, t)| (field_name, resolve_type(self.ctx, &t)))
                .collect();

            let concrete = StructType {
                name: name.clone(),
                fields,
                generic_base: Some(base.to_string()),
                generic_args: Some(resolved_args.clone()),
            };
            debug!("monomorphize struct {}", name);
            self.ctx.install_struct(concrete.clone());

            // HashMap<K, V> also gets its user-visible Entry<K, V> pair
            // struct, yielded by .entries() iteration.
            if base == "HashMap" && resolved_args.len() == 2 {
                let entry_name =
                    mangle_generic_name("Entry", &[resolved_args[0].clone(), resolved_args[1].clone()]);
                if self.ctx.structs.get(&entry_name).is_none() {
                    self.ctx.install_struct(StructType {
                        name: entry_name,
                        fields: vec![
                            ("key".to_string(), resolved_args[0].clone()),
                            ("value".to_string(), resolved_args[1].clone()),
                        ],
                        generic_base: Some("Entry".to_string()),
                        generic_args: Some(resolved_args.clone()),
                    });
                }
            }
            return Some(Type::Struct(concrete));
        }

        self.reporter.emit_error(
            codes::CE0020,
            format!("unknown generic type `{}`", base),
            span.clone(),
        );
        None
    }

    fn check_arity_and_bounds(
        &mut self,
        base: &str,
        type_params: &[sushi_ast::TypeParamDecl],
        args: &[Type],
        span: &Span,
    ) -> bool {
        if type_params.len() != args.len() {
            self.reporter.emit_error(
                codes::CE2009,
                format!(
                    "`{}` takes {} type argument{} but {} {} supplied",
                    base,
                    type_params.len(),
                    if type_params.len() == 1 { "" } else { "s" },
                    args.len(),
                    if args.len() == 1 { "was" } else { "were" }
                ),
                span.clone(),
            );
            return false;
        }
        let mut ok = true;
        for (param, arg) in type_params.iter().zip(args) {
            for bound in &param.bounds {
                if !self.ctx.satisfies_perk(arg, bound) {
                    self.reporter.emit_error(
                        codes::CE2052,
                        format!(
                            "type `{}` does not satisfy perk `{}` required by `{}`",
                            arg, bound, base
                        ),
                        span.clone(),
                    );
                    ok = false;
                }
            }
        }
        ok
    }

    // ---------------------------------------------------------------
    // Function instantiation
    // ---------------------------------------------------------------

    /// Walk every concrete function body; infer type arguments for calls to
    /// generic functions, instantiate, and rewrite call sites to the
    /// mangled monomorph. Newly produced bodies join the worklist.
    pub fn run_functions(&mut self, program: &mut Program) {
        for item in &mut program.items {
            match item {
                Item::Function(decl) if !decl.is_generic() => {
                    let mut vars: HashMap<String, Type> = HashMap::new();
                    for param in &decl.params {
                        vars.insert(param.name.clone(), param.ty.clone());
                    }
                    let mut body = std::mem::take(&mut decl.body);
                    self.rewrite_block(&mut body, &mut vars);
                    decl.body = body;
                }
                Item::Extend(decl) if decl.type_params.is_empty() => {
                    for method in &mut decl.methods {
                        let mut vars: HashMap<String, Type> = HashMap::new();
                        for param in &method.params {
                            vars.insert(param.name.clone(), param.ty.clone());
                        }
                        let mut body = std::mem::take(&mut method.body);
                        self.rewrite_block(&mut body, &mut vars);
                        method.body = body;
                    }
                }
                _ => {}
            }
        }
    }

    fn rewrite_block(&mut self, block: &mut Block, vars: &mut HashMap<String, Type>) {
        for stmt in &mut block.statements {
            self.rewrite_statement(stmt, vars);
        }
    }

    fn rewrite_statement(&mut self, stmt: &mut Statement, vars: &mut HashMap<String, Type>) {
        match stmt {
            Statement::Let(s) => {
                if let Some(init) = &mut s.init {
                    self.rewrite_expression(init, vars);
                }
                vars.insert(s.name.clone(), resolve_type(self.ctx, &s.declared_type));
            }
            Statement::Rebind(s) => {
                self.rewrite_expression(&mut s.target, vars);
                self.rewrite_expression(&mut s.value, vars);
            }
            Statement::Return(s) => {
                if let Some(value) = &mut s.value {
                    self.rewrite_expression(value, vars);
                }
            }
            Statement::If(s) => {
                self.rewrite_expression(&mut s.condition, vars);
                self.rewrite_block(&mut s.then_block, vars);
                if let Some(else_block) = &mut s.else_block {
                    self.rewrite_block(else_block, vars);
                }
            }
            Statement::While(s) => {
                self.rewrite_expression(&mut s.condition, vars);
                self.rewrite_block(&mut s.body, vars);
            }
            Statement::Foreach(s) => {
                self.rewrite_expression(&mut s.iterable, vars);
                if let Some(ty) = &s.declared_item_type {
                    vars.insert(s.item.clone(), resolve_type(self.ctx, ty));
                }
                self.rewrite_block(&mut s.body, vars);
            }
            Statement::Match(s) => {
                self.rewrite_expression(&mut s.scrutinee, vars);
                for arm in &mut s.arms {
                    self.bind_pattern_vars(&arm.pattern, &s.scrutinee, vars);
                    self.rewrite_block(&mut arm.body, vars);
                }
            }
            Statement::Print(s) => self.rewrite_expression(&mut s.value, vars),
            Statement::Expr(s) => self.rewrite_expression(&mut s.expr, vars),
            Statement::Break(_) | Statement::Continue(_) => {}
        }
    }

    /// Best-effort binding registration for pattern names, enough for the
    /// quick inference below; full checking happens in the validator.
    fn bind_pattern_vars(
        &self,
        pattern: &Pattern,
        scrutinee: &Expression,
        vars: &mut HashMap<String, Type>,
    ) {
        let Pattern::Enum(ep) = pattern else { return };
        let Some(scrutinee_ty) = self.quick_infer(scrutinee, vars) else {
            return;
        };
        let Some(enum_ty) = scrutinee_ty.as_enum().cloned() else {
            return;
        };
        let Some(variant) = enum_ty.variant(&ep.variant) else {
            return;
        };
        for (binding, slot_ty) in ep.bindings.iter().zip(&variant.associated_types) {
            if let sushi_ast::PatternBinding::Name(name) = binding {
                vars.insert(name.clone(), resolve_type(self.ctx, slot_ty));
            }
        }
    }

    fn rewrite_expression(&mut self, expr: &mut Expression, vars: &mut HashMap<String, Type>) {
        // Children first: their rewritten callees make quick inference of
        // this node's arguments precise.
        match &mut expr.kind {
            ExprKind::Binary { lhs, rhs, .. } => {
                self.rewrite_expression(lhs, vars);
                self.rewrite_expression(rhs, vars);
            }
            ExprKind::Unary { expr: inner, .. } | ExprKind::Borrow { expr: inner, .. } => {
                self.rewrite_expression(inner, vars)
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                self.rewrite_expression(receiver, vars);
                for arg in args {
                    self.rewrite_expression(arg, vars);
                }
            }
            ExprKind::DotCall { args, .. } | ExprKind::EnumConstructor { args, .. } => {
                for arg in args {
                    self.rewrite_expression(arg, vars);
                }
            }
            ExprKind::StructConstructor { args, .. } => {
                for arg in args {
                    self.rewrite_expression(&mut arg.value, vars);
                }
            }
            ExprKind::MemberAccess { object, .. } => self.rewrite_expression(object, vars),
            ExprKind::IndexAccess { object, index } => {
                self.rewrite_expression(object, vars);
                self.rewrite_expression(index, vars);
            }
            ExprKind::ArrayLiteral(items) | ExprKind::DynArrayFrom(items) => {
                for item in items {
                    self.rewrite_expression(item, vars);
                }
            }
            ExprKind::InterpolatedString(parts) => {
                for part in parts {
                    if let sushi_ast::InterpolationPart::Expr(e) = part {
                        self.rewrite_expression(e, vars);
                    }
                }
            }
            ExprKind::Range { start, end, .. } => {
                self.rewrite_expression(start, vars);
                self.rewrite_expression(end, vars);
            }
            ExprKind::Try { inner, .. } => self.rewrite_expression(inner, vars),
            ExprKind::Cast { expr: inner, .. } => self.rewrite_expression(inner, vars),
            ExprKind::Call { args, .. } => {
                for arg in args {
                    self.rewrite_expression(arg, vars);
                }
            }
            _ => {}
        }

        // Generic call sites rewrite to their monomorph.
        if let ExprKind::Call { callee, args } = &mut expr.kind {
            if self.ctx.generic_functions.contains_key(callee.as_str()) {
                let arg_types: Vec<Option<Type>> =
                    args.iter().map(|a| self.quick_infer(a, vars)).collect();
                let span = expr.span.clone();
                if let Some(mangled) = self.instantiate_function(callee, &arg_types, &span) {
                    *callee = mangled;
                }
            }
        }
    }

    /// Instantiate a generic function for the given argument types.
    /// Returns the mangled name; memoized through the function table.
    pub fn instantiate_function(
        &mut self,
        base: &str,
        arg_types: &[Option<Type>],
        span: &Span,
    ) -> Option<String> {
        let template = self.ctx.generic_functions.get(base)?.clone();

        if template.params.len() != arg_types.len() {
            self.reporter.emit_error(
                codes::CE2009,
                format!(
                    "`{}` takes {} argument{} but {} {} supplied",
                    base,
                    template.params.len(),
                    if template.params.len() == 1 { "" } else { "s" },
                    arg_types.len(),
                    if arg_types.len() == 1 { "was" } else { "were" }
                ),
                span.clone(),
            );
            return None;
        }

        // Unify declared parameter types against actual argument types.
        let mut bindings: HashMap<String, Type> = HashMap::new();
        for (param, actual) in template.params.iter().zip(arg_types) {
            let Some(actual) = actual else { continue };
            let actual = resolve_type(self.ctx, actual);
            if !unify(&param.ty, &actual, &mut bindings) {
                self.reporter.emit_error(
                    codes::CE2006,
                    format!(
                        "cannot unify argument of type `{}` with parameter `{}` of `{}`",
                        actual, param.ty, base
                    ),
                    span.clone(),
                );
                return None;
            }
        }

        let mut type_args = Vec::with_capacity(template.type_params.len());
        for tp in &template.type_params {
            match bindings.get(&tp.name) {
                Some(bound) => type_args.push(bound.clone()),
                None => {
                    self.reporter.emit_error(
                        codes::CE2006,
                        format!(
                            "cannot infer type parameter `{}` of `{}` from the call arguments",
                            tp.name, base
                        ),
                        span.clone(),
                    );
                    return None;
                }
            }
        }

        for (tp, arg) in template.type_params.iter().zip(&type_args) {
            for bound in &tp.bounds {
                if !self.ctx.satisfies_perk(arg, bound) {
                    self.reporter.emit_error(
                        codes::CE2052,
                        format!(
                            "type `{}` does not satisfy perk `{}` required by `{}`",
                            arg, bound, base
                        ),
                        span.clone(),
                    );
                    return None;
                }
            }
        }

        let mangled = mangle_function_name(base, &type_args);
        if self.ctx.functions.contains_key(&mangled) {
            return Some(mangled);
        }

        let subst = build_substitution(&template.type_params, &type_args);
        let mut concrete = template.clone();
        concrete.name = mangled.clone();
        concrete.type_params.clear();
        for param in &mut concrete.params {
            param.ty = substitute(&param.ty, &subst);
            self.request_type(&param.ty.clone(), span);
        }
        concrete.return_type = substitute(&concrete.return_type, &subst);
        self.request_type(&concrete.return_type.clone(), span);
        if let Some(err) = &concrete.err_type {
            concrete.err_type = Some(substitute(err, &subst));
        }
        substitute_block(&mut concrete.body, &subst);
        self.request_type(&wrapped_return_type(&concrete), span);

        let sig = FunctionSig {
            name: mangled.clone(),
            params: concrete.params.clone(),
            return_type: wrapped_return_type(&concrete),
            visibility: template.visibility,
            unit: String::new(),
            is_stdlib: false,
            is_library: false,
        };
        debug!("monomorphize fn {} -> {}", base, mangled);
        self.ctx.install_function(sig, Some(concrete.clone()));

        // The substituted body may itself call generic functions.
        let mut vars: HashMap<String, Type> = HashMap::new();
        for param in &concrete.params {
            vars.insert(param.name.clone(), param.ty.clone());
        }
        let mut body = concrete.body.clone();
        self.rewrite_block(&mut body, &mut vars);
        let installed = self
            .ctx
            .function_bodies
            .get_mut(&mangled)
            .expect("freshly installed body");
        installed.body = body;

        Some(mangled)
    }

    /// Instantiate a generic extension method (`extend List<T>: fn sum…`)
    /// for a concrete receiver. Installs the concrete method and returns it.
    pub fn instantiate_generic_extension(
        &mut self,
        base: &str,
        receiver: &Type,
        method_name: &str,
        span: &Span,
    ) -> Option<ExtensionMethod> {
        let receiver_key = receiver.to_string();
        if let Some(existing) = self
            .ctx
            .extensions
            .get(&receiver_key)
            .and_then(|methods| methods.get(method_name))
        {
            return Some(existing.clone());
        }

        let template = self
            .ctx
            .generic_extensions
            .get(base)
            .and_then(|methods| methods.get(method_name))?
            .clone();

        let generic_args = match receiver {
            Type::Struct(s) => s.generic_args.clone()?,
            Type::Enum(e) => e.generic_args.clone()?,
            _ => return None,
        };
        let subst = build_substitution(&template.type_params, &generic_args);

        let symbol = crate::context::extension_symbol(&receiver_key, method_name);
        let mut concrete = template.clone();
        concrete.name = symbol.clone();
        concrete.type_params.clear();
        for param in &mut concrete.params {
            param.ty = substitute(&param.ty, &subst);
        }
        concrete.return_type = substitute(&concrete.return_type, &subst);
        if let Some(err) = &concrete.err_type {
            concrete.err_type = Some(substitute(err, &subst));
        }
        substitute_block(&mut concrete.body, &subst);
        // The receiver slot was left as the generic target by the parser.
        if let Some(self_param) = concrete.params.first_mut() {
            self_param.ty = substitute(&self_param.ty, &subst);
        }
        self.request_type(&wrapped_return_type(&concrete), span);

        let sig = FunctionSig {
            name: symbol.clone(),
            params: concrete.params.clone(),
            return_type: wrapped_return_type(&concrete),
            visibility: concrete.visibility,
            unit: String::new(),
            is_stdlib: false,
            is_library: false,
        };
        self.ctx.install_function(sig, Some(concrete.clone()));

        let method = ExtensionMethod {
            receiver: receiver.clone(),
            symbol,
            decl: concrete,
        };
        self.ctx
            .extensions
            .entry(receiver_key)
            .or_default()
            .insert(method_name.to_string(), method.clone());
        Some(method)
    }

    // ---------------------------------------------------------------
    // Quick type inference (call-site argument typing)
    // ---------------------------------------------------------------

    /// Shallow inference, just enough to type generic-call arguments before
    /// the validator runs: literals, known names, calls to known functions,
    /// and the unwrapping methods.
    fn quick_infer(&self, expr: &Expression, vars: &HashMap<String, Type>) -> Option<Type> {
        match &expr.kind {
            ExprKind::IntLiteral(_) => Some(Type::I32),
            ExprKind::FloatLiteral(_) => Some(Type::F64),
            ExprKind::BoolLiteral(_) => Some(Type::BOOL),
            ExprKind::StringLiteral(_) | ExprKind::InterpolatedString(_) => Some(Type::STRING),
            ExprKind::Name(name) => vars
                .get(name)
                .cloned()
                .or_else(|| self.ctx.constants.get(name).map(|c| c.ty.clone()))
                .map(|t| resolve_type(self.ctx, &t)),
            ExprKind::Cast { target, .. } => Some(resolve_type(self.ctx, target)),
            ExprKind::Borrow { mode, expr: inner } => self
                .quick_infer(inner, vars)
                .map(|t| Type::reference(t, *mode)),
            ExprKind::Call { callee, .. } => self
                .ctx
                .functions
                .get(callee)
                .map(|sig| resolve_type(self.ctx, &sig.return_type)),
            ExprKind::MethodCall {
                receiver, method, ..
            } if method == "realise" || method == "expect" => {
                let receiver_ty = self.quick_infer(receiver, vars)?;
                unwrap_success_type(&receiver_ty)
            }
            ExprKind::Try { inner, .. } => {
                let inner_ty = self.quick_infer(inner, vars)?;
                unwrap_success_type(&inner_ty)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                if op.is_comparison() || op.is_logical() {
                    Some(Type::BOOL)
                } else {
                    self.quick_infer(lhs, vars)
                        .or_else(|| self.quick_infer(rhs, vars))
                }
            }
            ExprKind::Unary { expr: inner, .. } => self.quick_infer(inner, vars),
            ExprKind::ArrayLiteral(items) => {
                let first = self.quick_infer(items.first()?, vars)?;
                Some(Type::array(first, items.len() as u32))
            }
            ExprKind::DynArrayFrom(items) => {
                let first = self.quick_infer(items.first()?, vars)?;
                Some(Type::dyn_array(first))
            }
            ExprKind::DynArrayNew { element_type } => {
                Some(Type::dyn_array(resolve_type(self.ctx, element_type)))
            }
            ExprKind::StructConstructor { name, .. } => {
                self.ctx.structs.get(name).cloned().map(Type::Struct)
            }
            ExprKind::IndexAccess { object, .. } => {
                match self.quick_infer(object, vars)? {
                    Type::Array { base, .. } | Type::DynArray { base } => Some(*base),
                    _ => None,
                }
            }
            ExprKind::MemberAccess { object, field } => {
                let object_ty = self.quick_infer(object, vars)?;
                let field_ty = object_ty.as_struct()?.field_type(field)?.clone();
                Some(resolve_type(self.ctx, &field_ty))
            }
            _ => None,
        }
    }
}

/// The success payload of a Result- or Maybe-typed value.
fn unwrap_success_type(ty: &Type) -> Option<Type> {
    match ty {
        Type::Result { ok, .. } => Some((**ok).clone()),
        Type::Enum(e) if e.is_result_shaped() || e.is_maybe_shaped() => {
            e.variants[0].associated_types.first().cloned()
        }
        _ => None,
    }
}

fn build_substitution(
    params: &[sushi_ast::TypeParamDecl],
    args: &[Type],
) -> HashMap<String, Type> {
    params
        .iter()
        .zip(args)
        .map(|(p, a)| (p.name.clone(), a.clone()))
        .collect()
}

/// Structural substitution of type parameters.
pub fn substitute(ty: &Type, subst: &HashMap<String, Type>) -> Type {
    match ty {
        Type::TypeParam(name) => subst.get(name).cloned().unwrap_or_else(|| ty.clone()),
        Type::Array { base, size } => Type::Array {
            base: Box::new(substitute(base, subst)),
            size: *size,
        },
        Type::DynArray { base } => Type::dyn_array(substitute(base, subst)),
        Type::Reference { inner, mode } => Type::reference(substitute(inner, subst), *mode),
        Type::Pointer { pointee } => Type::pointer(substitute(pointee, subst)),
        Type::Iterator { element } => Type::iterator(substitute(element, subst)),
        Type::Result { ok, err } => Type::result(substitute(ok, subst), substitute(err, subst)),
        Type::GenericRef { base, args } => Type::GenericRef {
            base: base.clone(),
            args: args.iter().map(|a| substitute(a, subst)).collect(),
        },
        _ => ty.clone(),
    }
}

fn substitute_block(block: &mut Block, subst: &HashMap<String, Type>) {
    for stmt in &mut block.statements {
        substitute_statement(stmt, subst);
    }
}

fn substitute_statement(stmt: &mut Statement, subst: &HashMap<String, Type>) {
    match stmt {
        Statement::Let(s) => {
            s.declared_type = substitute(&s.declared_type, subst);
            if let Some(init) = &mut s.init {
                substitute_expression(init, subst);
            }
        }
        Statement::Rebind(s) => {
            substitute_expression(&mut s.target, subst);
            substitute_expression(&mut s.value, subst);
        }
        Statement::Return(s) => {
            if let Some(value) = &mut s.value {
                substitute_expression(value, subst);
            }
        }
        Statement::If(s) => {
            substitute_expression(&mut s.condition, subst);
            substitute_block(&mut s.then_block, subst);
            if let Some(else_block) = &mut s.else_block {
                substitute_block(else_block, subst);
            }
        }
        Statement::While(s) => {
            substitute_expression(&mut s.condition, subst);
            substitute_block(&mut s.body, subst);
        }
        Statement::Foreach(s) => {
            if let Some(ty) = &mut s.declared_item_type {
                *ty = substitute(ty, subst);
            }
            substitute_expression(&mut s.iterable, subst);
            substitute_block(&mut s.body, subst);
        }
        Statement::Match(s) => {
            substitute_expression(&mut s.scrutinee, subst);
            for arm in &mut s.arms {
                substitute_block(&mut arm.body, subst);
            }
        }
        Statement::Print(s) => substitute_expression(&mut s.value, subst),
        Statement::Expr(s) => substitute_expression(&mut s.expr, subst),
        Statement::Break(_) | Statement::Continue(_) => {}
    }
}

fn substitute_expression(expr: &mut Expression, subst: &HashMap<String, Type>) {
    match &mut expr.kind {
        ExprKind::Cast { expr: inner, target } => {
            *target = substitute(target, subst);
            substitute_expression(inner, subst);
        }
        ExprKind::DynArrayNew { element_type } => {
            *element_type = substitute(element_type, subst);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            substitute_expression(lhs, subst);
            substitute_expression(rhs, subst);
        }
        ExprKind::Unary { expr: inner, .. } | ExprKind::Borrow { expr: inner, .. } => {
            substitute_expression(inner, subst)
        }
        ExprKind::Call { args, .. }
        | ExprKind::DotCall { args, .. }
        | ExprKind::EnumConstructor { args, .. } => {
            for arg in args {
                substitute_expression(arg, subst);
            }
        }
        ExprKind::MethodCall { receiver, args, .. } => {
            substitute_expression(receiver, subst);
            for arg in args {
                substitute_expression(arg, subst);
            }
        }
        ExprKind::StructConstructor { args, .. } => {
            for arg in args {
                substitute_expression(&mut arg.value, subst);
            }
        }
        ExprKind::MemberAccess { object, .. } => substitute_expression(object, subst),
        ExprKind::IndexAccess { object, index } => {
            substitute_expression(object, subst);
            substitute_expression(index, subst);
        }
        ExprKind::ArrayLiteral(items) | ExprKind::DynArrayFrom(items) => {
            for item in items {
                substitute_expression(item, subst);
            }
        }
        ExprKind::InterpolatedString(parts) => {
            for part in parts {
                if let sushi_ast::InterpolationPart::Expr(e) = part {
                    substitute_expression(e, subst);
                }
            }
        }
        ExprKind::Range { start, end, .. } => {
            substitute_expression(start, subst);
            substitute_expression(end, subst);
        }
        ExprKind::Try { inner, .. } => substitute_expression(inner, subst),
        _ => {}
    }
}

/// Unification of a declared (possibly generic) parameter type against a
/// concrete argument type, accumulating type-parameter bindings.
fn unify(declared: &Type, actual: &Type, bindings: &mut HashMap<String, Type>) -> bool {
    match (declared, actual) {
        (Type::TypeParam(name), _) => match bindings.get(name) {
            Some(bound) => bound == actual,
            None => {
                bindings.insert(name.clone(), actual.clone());
                true
            }
        },
        (Type::GenericRef { base, args }, Type::Struct(s)) if s.is_monomorph_of(base) => {
            match &s.generic_args {
                Some(actual_args) if actual_args.len() == args.len() => args
                    .iter()
                    .zip(actual_args)
                    .all(|(d, a)| unify(d, a, bindings)),
                _ => false,
            }
        }
        (Type::GenericRef { base, args }, Type::Enum(e)) if e.is_monomorph_of(base) => {
            match &e.generic_args {
                Some(actual_args) if actual_args.len() == args.len() => args
                    .iter()
                    .zip(actual_args)
                    .all(|(d, a)| unify(d, a, bindings)),
                _ => false,
            }
        }
        (Type::Result { ok, err }, Type::Enum(e)) if e.is_monomorph_of("Result") => {
            match &e.generic_args {
                Some(actual_args) if actual_args.len() == 2 => {
                    unify(ok, &actual_args[0], bindings) && unify(err, &actual_args[1], bindings)
                }
                _ => false,
            }
        }
        (
            Type::Array { base: d, size: ds },
            Type::Array { base: a, size: asz },
        ) => ds == asz && unify(d, a, bindings),
        (Type::DynArray { base: d }, Type::DynArray { base: a }) => unify(d, a, bindings),
        (
            Type::Reference { inner: d, mode: dm },
            Type::Reference { inner: a, mode: am },
        ) => (dm == am || *am == sushi_ast::RefMode::Poke) && unify(d, a, bindings),
        (Type::Pointer { pointee: d }, Type::Pointer { pointee: a }) => unify(d, a, bindings),
        (Type::Iterator { element: d }, Type::Iterator { element: a }) => unify(d, a, bindings),
        _ => declared == actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantics::collect::Collector;
    use sushi_ast::{LetStmt, TypeParamDecl, Visibility};

    fn prepared() -> (CompilerContext, DiagnosticEngine) {
        let mut ctx = CompilerContext::new();
        let mut reporter = DiagnosticEngine::new("t.sushi");
        Collector::new(&mut ctx, &mut reporter).run(&Program::new("main"));
        (ctx, reporter)
    }

    #[test]
    fn instantiates_maybe_once() {
        let (mut ctx, mut reporter) = prepared();
        let mut mono = Monomorphizer::new(&mut ctx, &mut reporter);
        let first = mono
            .ensure_instantiated("Maybe", &[Type::I32], &Span::synthetic(), 0)
            .expect("instantiated");
        let second = mono
            .ensure_instantiated("Maybe", &[Type::I32], &Span::synthetic(), 0)
            .expect("memoized");
        assert_eq!(first, second);
        assert!(ctx.enums.contains_key("Maybe<i32>"));
        let concrete = &ctx.enums["Maybe<i32>"];
        assert_eq!(concrete.generic_base.as_deref(), Some("Maybe"));
        assert_eq!(
            concrete.variants[0].associated_types,
            vec![Type::I32]
        );
    }

    #[test]
    fn result_sugar_instantiates_enum() {
        let (mut ctx, mut reporter) = prepared();
        let result_ty = Type::result(Type::I32, Type::Unknown("StdError".to_string()));
        Monomorphizer::new(&mut ctx, &mut reporter)
            .request_type(&result_ty, &Span::synthetic());
        assert!(ctx.enums.contains_key("Result<i32, StdError>"));
        let concrete = &ctx.enums["Result<i32, StdError>"];
        assert!(concrete.is_result_shaped());
        // Err payload resolved to the concrete StdError enum
        assert!(matches!(
            concrete.variants[1].associated_types[0],
            Type::Enum(ref e) if e.name == "StdError"
        ));
    }

    #[test]
    fn nested_generics_run_to_fixed_point() {
        let (mut ctx, mut reporter) = prepared();
        let nested = Type::generic_ref(
            "List",
            vec![Type::generic_ref("Maybe", vec![Type::STRING])],
        );
        Monomorphizer::new(&mut ctx, &mut reporter).request_type(&nested, &Span::synthetic());
        assert!(ctx.enums.contains_key("Maybe<string>"));
        assert!(ctx.structs.contains_key("List<Maybe<string>>"));
    }

    #[test]
    fn hashmap_requires_hashable_key() {
        let (mut ctx, mut reporter) = prepared();
        Monomorphizer::new(&mut ctx, &mut reporter).ensure_instantiated(
            "HashMap",
            &[Type::F64, Type::I32],
            &Span::synthetic(),
            0,
        );
        assert!(reporter.has_code(codes::CE2052));

        let mut reporter2 = DiagnosticEngine::new("t.sushi");
        let result = Monomorphizer::new(&mut ctx, &mut reporter2).ensure_instantiated(
            "HashMap",
            &[Type::STRING, Type::I32],
            &Span::synthetic(),
            0,
        );
        assert!(result.is_some());
        assert!(!reporter2.has_errors());
        assert!(ctx.structs.contains_key("HashMap<string, i32>"));
        assert!(ctx.structs.contains_key("Entry<string, i32>"));
    }

    #[test]
    fn arity_mismatch_reported() {
        let (mut ctx, mut reporter) = prepared();
        Monomorphizer::new(&mut ctx, &mut reporter).ensure_instantiated(
            "Maybe",
            &[Type::I32, Type::I32],
            &Span::synthetic(),
            0,
        );
        assert!(reporter.has_code(codes::CE2009));
    }

    fn generic_pair_fn() -> FunctionDecl {
        FunctionDecl {
            name: "pair".to_string(),
            type_params: vec![TypeParamDecl::plain("T")],
            params: vec![
                Param::new("x", Type::TypeParam("T".to_string())),
                Param::new("y", Type::TypeParam("T".to_string())),
            ],
            return_type: Type::I32,
            err_type: None,
            visibility: Visibility::Public,
            body: Block::new(vec![Statement::Return(sushi_ast::ReturnStmt {
                value: Some(Expression::enum_constructor(
                    "Result",
                    "Ok",
                    vec![Expression::int(2)],
                )),
                span: Span::synthetic(),
            })]),
            span: Span::synthetic(),
        }
    }

    #[test]
    fn function_monomorphs_per_argument_type() {
        let (mut ctx, mut reporter) = prepared();
        ctx.generic_functions
            .insert("pair".to_string(), generic_pair_fn());

        let mut mono = Monomorphizer::new(&mut ctx, &mut reporter);
        let a = mono.instantiate_function(
            "pair",
            &[Some(Type::I32), Some(Type::I32)],
            &Span::synthetic(),
        );
        let b = mono.instantiate_function(
            "pair",
            &[Some(Type::STRING), Some(Type::STRING)],
            &Span::synthetic(),
        );
        assert_eq!(a.as_deref(), Some("pair__i32"));
        assert_eq!(b.as_deref(), Some("pair__string"));
        assert!(ctx.functions.contains_key("pair__i32"));
        assert!(ctx.functions.contains_key("pair__string"));
        let mono_sig = &ctx.functions["pair__string"];
        assert_eq!(mono_sig.params[0].ty, Type::STRING);
    }

    #[test]
    fn conflicting_inference_is_rejected() {
        let (mut ctx, mut reporter) = prepared();
        ctx.generic_functions
            .insert("pair".to_string(), generic_pair_fn());
        let result = Monomorphizer::new(&mut ctx, &mut reporter).instantiate_function(
            "pair",
            &[Some(Type::I32), Some(Type::STRING)],
            &Span::synthetic(),
        );
        assert!(result.is_none());
        assert!(reporter.has_code(codes::CE2006));
    }

    #[test]
    fn call_sites_are_rewritten() {
        let (mut ctx, mut reporter) = prepared();
        ctx.generic_functions
            .insert("pair".to_string(), generic_pair_fn());

        let mut program = Program::new("main");
        program.items.push(Item::Function(FunctionDecl {
            name: "main".to_string(),
            type_params: vec![],
            params: vec![],
            return_type: Type::I32,
            err_type: None,
            visibility: Visibility::Public,
            body: Block::new(vec![Statement::Let(LetStmt {
                name: "n".to_string(),
                declared_type: Type::I32,
                init: Some(Expression::method_call(
                    Expression::call("pair", vec![Expression::int(1), Expression::int(2)]),
                    "realise",
                    vec![Expression::int(0)],
                )),
                span: Span::synthetic(),
            })]),
            span: Span::synthetic(),
        }));

        let mut mono = Monomorphizer::new(&mut ctx, &mut reporter);
        mono.run_types(&program);
        mono.run_functions(&mut program);
        assert!(!reporter.has_errors());

        let main = program.functions().next().unwrap();
        let Statement::Let(let_stmt) = &main.body.statements[0] else {
            panic!("expected let");
        };
        let ExprKind::MethodCall { receiver, .. } = &let_stmt.init.as_ref().unwrap().kind else {
            panic!("expected method call");
        };
        let ExprKind::Call { callee, .. } = &receiver.kind else {
            panic!("expected call");
        };
        assert_eq!(callee, "pair__i32");
    }

    #[test]
    fn substitution_handles_nested_generics() {
        let mut subst = HashMap::new();
        subst.insert("T".to_string(), Type::I32);
        let template = Type::generic_ref("List", vec![Type::TypeParam("T".to_string())]);
        assert_eq!(
            substitute(&template, &subst),
            Type::generic_ref("List", vec![Type::I32])
        );
    }
}
