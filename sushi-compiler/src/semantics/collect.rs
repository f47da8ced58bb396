//! Pass 0: walk the parsed program, populate the symbol tables, and
//! register the predefined types every unit can see.

use crate::context::{
    CompilerContext, ConstInfo, ExtensionMethod, FunctionSig, GenericEnumDef, GenericStructDef,
    PerkImpl,
};
use crate::semantics::{stdlib, wrapped_return_type};
use log::debug;
use sushi_ast::{
    BuiltinKind, EnumType, EnumVariant, Expression, ExprKind, Item, Program, StructType, Type,
    TypeParamDecl,
};
use sushi_diagnostics::{codes, DiagnosticEngine, Span};

pub struct Collector<'a> {
    ctx: &'a mut CompilerContext,
    reporter: &'a mut DiagnosticEngine,
}

impl<'a> Collector<'a> {
    pub fn new(ctx: &'a mut CompilerContext, reporter: &'a mut DiagnosticEngine) -> Self {
        Self { ctx, reporter }
    }

    pub fn run(&mut self, program: &Program) {
        self.register_predefined_enums();
        self.register_predefined_generics();
        self.register_primitive_hashables();
        self.register_stdlib_imports(program);

        for item in &program.items {
            match item {
                Item::Const(decl) => self.collect_const(decl),
                Item::Struct(decl) => self.collect_struct(decl),
                Item::Enum(decl) => self.collect_enum(decl),
                Item::Perk(decl) => self.collect_perk(decl),
                Item::Extend(decl) => self.collect_extend(decl),
                Item::Function(decl) => self.collect_function(decl, &program.unit),
            }
        }

        debug!(
            "collect: {} functions, {} structs, {} enums, {} generics",
            self.ctx.functions.len(),
            self.ctx.structs.len(),
            self.ctx.enums.len(),
            self.ctx.generic_structs.len() + self.ctx.generic_enums.len()
        );
    }

    /// Predefined enums available in every unit: file-operation enums plus
    /// StdError, the default error type of implicit Result returns.
    /// FileResult deliberately stays nominal — it is never a Result
    /// monomorph, and its variants are always written qualified.
    fn register_predefined_enums(&mut self) {
        let file_mode = EnumType::new(
            "FileMode",
            vec![
                EnumVariant::unit("Read"),
                EnumVariant::unit("Write"),
                EnumVariant::unit("Append"),
                EnumVariant::unit("ReadB"),
                EnumVariant::unit("WriteB"),
                EnumVariant::unit("AppendB"),
            ],
        );
        self.ctx.install_enum(file_mode);

        let seek_from = EnumType::new(
            "SeekFrom",
            vec![
                EnumVariant::unit("Start"),
                EnumVariant::unit("Current"),
                EnumVariant::unit("End"),
            ],
        );
        self.ctx.install_enum(seek_from);

        let file_error = EnumType::new(
            "FileError",
            vec![
                EnumVariant::unit("NotFound"),
                EnumVariant::unit("PermissionDenied"),
                EnumVariant::unit("AlreadyExists"),
                EnumVariant::unit("IsDirectory"),
                EnumVariant::unit("DiskFull"),
                EnumVariant::unit("TooManyOpen"),
                EnumVariant::unit("InvalidPath"),
                EnumVariant::unit("IOError"),
                EnumVariant::unit("Other"),
            ],
        );
        let file_error_ty = Type::Enum(file_error.clone());
        self.ctx.install_enum(file_error);

        let file_result = EnumType::new(
            "FileResult",
            vec![
                EnumVariant::new("Ok", vec![Type::Builtin(BuiltinKind::File)]),
                EnumVariant::new("Err", vec![file_error_ty]),
            ],
        );
        self.ctx.install_enum(file_result);

        let std_error = EnumType::new(
            "StdError",
            vec![
                EnumVariant::unit("NotFound"),
                EnumVariant::unit("InvalidInput"),
                EnumVariant::unit("OutOfRange"),
                EnumVariant::unit("IOError"),
                EnumVariant::unit("Unknown"),
            ],
        );
        self.ctx.install_enum(std_error);
    }

    /// Predefined generic templates: Result, Maybe, Own, HashMap, List.
    fn register_predefined_generics(&mut self) {
        let t = || Type::TypeParam("T".to_string());

        self.ctx.generic_enums.insert(
            "Result".to_string(),
            GenericEnumDef {
                name: "Result".to_string(),
                type_params: vec![TypeParamDecl::plain("T"), TypeParamDecl::plain("E")],
                variants: vec![
                    EnumVariant::new("Ok", vec![t()]),
                    EnumVariant::new("Err", vec![Type::TypeParam("E".to_string())]),
                ],
                span: Span::synthetic(),
            },
        );

        self.ctx.generic_enums.insert(
            "Maybe".to_string(),
            GenericEnumDef {
                name: "Maybe".to_string(),
                type_params: vec![TypeParamDecl::plain("T")],
                variants: vec![EnumVariant::new("Some", vec![t()]), EnumVariant::unit("None")],
                span: Span::synthetic(),
            },
        );

        self.ctx.generic_structs.insert(
            "Own".to_string(),
            GenericStructDef {
                name: "Own".to_string(),
                type_params: vec![TypeParamDecl::plain("T")],
                fields: vec![("value".to_string(), Type::pointer(t()))],
                span: Span::synthetic(),
            },
        );

        // The buckets field is a placeholder; the emitter lays buckets out as
        // Entry<K, V> = { K, V, i8 }.
        self.ctx.generic_structs.insert(
            "HashMap".to_string(),
            GenericStructDef {
                name: "HashMap".to_string(),
                type_params: vec![
                    TypeParamDecl {
                        name: "K".to_string(),
                        bounds: vec!["Hashable".to_string()],
                    },
                    TypeParamDecl::plain("V"),
                ],
                fields: vec![
                    ("buckets".to_string(), Type::dyn_array(Type::I32)),
                    ("size".to_string(), Type::I32),
                    ("capacity".to_string(), Type::I32),
                    ("tombstones".to_string(), Type::I32),
                ],
                span: Span::synthetic(),
            },
        );

        self.ctx.generic_structs.insert(
            "List".to_string(),
            GenericStructDef {
                name: "List".to_string(),
                type_params: vec![TypeParamDecl::plain("T")],
                fields: vec![
                    ("len".to_string(), Type::I32),
                    ("capacity".to_string(), Type::I32),
                    ("data".to_string(), Type::pointer(t())),
                ],
                span: Span::synthetic(),
            },
        );
    }

    /// Primitives auto-satisfy Hashable.
    fn register_primitive_hashables(&mut self) {
        const HASHABLE: &[BuiltinKind] = &[
            BuiltinKind::I8,
            BuiltinKind::I16,
            BuiltinKind::I32,
            BuiltinKind::I64,
            BuiltinKind::U8,
            BuiltinKind::U16,
            BuiltinKind::U32,
            BuiltinKind::U64,
            BuiltinKind::Bool,
            BuiltinKind::String,
        ];
        for kind in HASHABLE {
            self.ctx.register_perk_impl(
                kind.token().to_string(),
                "Hashable".to_string(),
                PerkImpl::AutoDerived,
            );
        }
    }

    /// Invariant T2: every used stdlib module's functions land in the
    /// function table flagged is_stdlib.
    fn register_stdlib_imports(&mut self, program: &Program) {
        for use_decl in &program.uses {
            if !use_decl.is_stdlib {
                continue;
            }
            let Some(functions) = stdlib::module_functions(&use_decl.path) else {
                self.reporter.emit_error(
                    codes::CE2001,
                    format!("unknown stdlib module `{}`", use_decl.path),
                    use_decl.span.clone(),
                );
                continue;
            };
            for sig in functions {
                self.ctx.install_function(sig, None);
            }
            for constant in stdlib::module_constants(&use_decl.path) {
                self.ctx.constants.insert(
                    constant.name.to_string(),
                    ConstInfo {
                        ty: constant.ty.clone(),
                        value: Expression::new(
                            ExprKind::FloatLiteral(constant.float_value),
                            Span::synthetic(),
                        ),
                        span: Span::synthetic(),
                    },
                );
            }
        }
    }

    fn collect_const(&mut self, decl: &sushi_ast::ConstDecl) {
        if self.ctx.constants.contains_key(&decl.name) {
            self.reporter.emit_error(
                codes::CE2046,
                format!("constant `{}` is defined more than once", decl.name),
                decl.span.clone(),
            );
            return;
        }
        self.ctx.constants.insert(
            decl.name.clone(),
            ConstInfo {
                ty: decl.ty.clone(),
                value: decl.value.clone(),
                span: decl.span.clone(),
            },
        );
    }

    fn collect_struct(&mut self, decl: &sushi_ast::StructDecl) {
        if decl.is_generic() {
            if self.ctx.generic_structs.contains_key(&decl.name)
                || self.ctx.is_generic_base(&decl.name)
            {
                self.reporter.emit_error(
                    codes::CE2046,
                    format!("generic type `{}` is defined more than once", decl.name),
                    decl.span.clone(),
                );
                return;
            }
            self.ctx.generic_structs.insert(
                decl.name.clone(),
                GenericStructDef {
                    name: decl.name.clone(),
                    type_params: decl.type_params.clone(),
                    fields: decl
                        .fields
                        .iter()
                        .map(|f| (f.name.clone(), f.ty.clone()))
                        .collect(),
                    span: decl.span.clone(),
                },
            );
            return;
        }

        if self.ctx.structs.contains_key(&decl.name) {
            self.reporter.emit_error(
                codes::CE0006,
                format!("struct `{}` is defined more than once", decl.name),
                decl.span.clone(),
            );
            return;
        }
        self.ctx.install_struct(StructType::new(
            decl.name.clone(),
            decl.fields
                .iter()
                .map(|f| (f.name.clone(), f.ty.clone()))
                .collect(),
        ));
    }

    fn collect_enum(&mut self, decl: &sushi_ast::EnumDecl) {
        let variants: Vec<EnumVariant> = decl
            .variants
            .iter()
            .map(|v| EnumVariant::new(v.name.clone(), v.associated_types.clone()))
            .collect();

        if decl.is_generic() {
            if self.ctx.generic_enums.contains_key(&decl.name)
                || self.ctx.is_generic_base(&decl.name)
            {
                self.reporter.emit_error(
                    codes::CE2046,
                    format!("generic type `{}` is defined more than once", decl.name),
                    decl.span.clone(),
                );
                return;
            }
            self.ctx.generic_enums.insert(
                decl.name.clone(),
                GenericEnumDef {
                    name: decl.name.clone(),
                    type_params: decl.type_params.clone(),
                    variants,
                    span: decl.span.clone(),
                },
            );
            return;
        }

        if self.ctx.enums.contains_key(&decl.name) {
            self.reporter.emit_error(
                codes::CE0004,
                format!("enum `{}` is defined more than once", decl.name),
                decl.span.clone(),
            );
            return;
        }
        self.ctx
            .install_enum(EnumType::new(decl.name.clone(), variants));
    }

    fn collect_perk(&mut self, decl: &sushi_ast::PerkDecl) {
        if self.ctx.perks.contains_key(&decl.name) {
            self.reporter.emit_error(
                codes::CE2046,
                format!("perk `{}` is defined more than once", decl.name),
                decl.span.clone(),
            );
            return;
        }
        self.ctx.perks.insert(decl.name.clone(), decl.clone());
    }

    fn collect_extend(&mut self, decl: &sushi_ast::ExtendDecl) {
        if let Some(perk_name) = &decl.perk {
            if !self.ctx.perks.contains_key(perk_name) {
                self.reporter.emit_error(
                    codes::CE2008,
                    format!("unknown perk `{}`", perk_name),
                    decl.span.clone(),
                );
                return;
            }
            let target_key = decl.target.to_string();
            self.ctx.register_perk_impl(
                target_key.clone(),
                perk_name.clone(),
                PerkImpl::Explicit(decl.methods.clone()),
            );
            // Perk methods compile as plain functions under their mangled
            // symbol, exactly like extension methods.
            for method in &decl.methods {
                let symbol =
                    crate::context::perk_method_symbol(&target_key, perk_name, &method.name);
                let mut compiled = method.clone();
                compiled.name = symbol.clone();
                let sig = FunctionSig {
                    name: symbol,
                    params: compiled.params.clone(),
                    return_type: wrapped_return_type(&compiled),
                    visibility: compiled.visibility,
                    unit: String::new(),
                    is_stdlib: false,
                    is_library: false,
                };
                self.ctx.install_function(sig, Some(compiled));
            }
            return;
        }

        // Plain extension methods. A generic target ("extend List<T>") goes
        // into the generic extension table keyed by base name.
        if !decl.type_params.is_empty() {
            let base = match &decl.target {
                Type::GenericRef { base, .. } => base.clone(),
                other => other.to_string(),
            };
            let methods = self.ctx.generic_extensions.entry(base).or_default();
            for method in &decl.methods {
                methods.insert(method.name.clone(), method.clone());
            }
            return;
        }

        let key = decl.target.to_string();
        for method in &decl.methods {
            let symbol = crate::context::extension_symbol(&key, &method.name);
            let entry = ExtensionMethod {
                receiver: decl.target.clone(),
                symbol: symbol.clone(),
                decl: method.clone(),
            };
            self.ctx
                .extensions
                .entry(key.clone())
                .or_default()
                .insert(method.name.clone(), entry);

            // Extension methods compile as plain functions under their
            // mangled symbol; the receiver is the parser-synthesized first
            // parameter.
            let mut compiled = method.clone();
            compiled.name = symbol.clone();
            let sig = FunctionSig {
                name: symbol,
                params: compiled.params.clone(),
                return_type: wrapped_return_type(&compiled),
                visibility: compiled.visibility,
                unit: String::new(),
                is_stdlib: false,
                is_library: false,
            };
            self.ctx.install_function(sig, Some(compiled));
        }
    }

    fn collect_function(&mut self, decl: &sushi_ast::FunctionDecl, unit: &str) {
        if self.ctx.is_function_name(&decl.name) {
            self.reporter.emit_error(
                codes::CE2046,
                format!("function `{}` is defined more than once", decl.name),
                decl.span.clone(),
            );
            return;
        }

        if decl.is_generic() {
            // Invariant T1: generic templates never enter the concrete table.
            self.ctx
                .generic_functions
                .insert(decl.name.clone(), decl.clone());
            return;
        }

        let sig = FunctionSig {
            name: decl.name.clone(),
            params: decl.params.clone(),
            return_type: wrapped_return_type(decl),
            visibility: decl.visibility,
            unit: unit.to_string(),
            is_stdlib: false,
            is_library: false,
        };
        self.ctx.install_function(sig, Some(decl.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sushi_ast::{Block, FunctionDecl, Item, Param, UseDecl, Visibility};

    fn collect(program: &Program) -> (CompilerContext, DiagnosticEngine) {
        let mut ctx = CompilerContext::new();
        let mut reporter = DiagnosticEngine::new("test.sushi");
        Collector::new(&mut ctx, &mut reporter).run(program);
        (ctx, reporter)
    }

    fn empty_fn(name: &str) -> FunctionDecl {
        FunctionDecl {
            name: name.to_string(),
            type_params: vec![],
            params: vec![],
            return_type: Type::BLANK,
            err_type: None,
            visibility: Visibility::Public,
            body: Block::default(),
            span: Span::synthetic(),
        }
    }

    #[test]
    fn predefined_enums_are_registered() {
        let (ctx, reporter) = collect(&Program::new("main"));
        assert!(!reporter.has_errors());
        for name in ["FileMode", "SeekFrom", "FileError", "FileResult", "StdError"] {
            assert!(ctx.enums.contains_key(name), "missing {}", name);
        }
        // FileResult is nominal, never a Result monomorph
        let file_result = &ctx.enums["FileResult"];
        assert!(file_result.generic_base.is_none());
        assert!(file_result.is_result_shaped());
    }

    #[test]
    fn predefined_generics_are_registered() {
        let (ctx, _) = collect(&Program::new("main"));
        assert!(ctx.generic_enums.contains_key("Result"));
        assert!(ctx.generic_enums.contains_key("Maybe"));
        for name in ["Own", "HashMap", "List"] {
            assert!(ctx.generic_structs.contains_key(name), "missing {}", name);
        }
        let hashmap = &ctx.generic_structs["HashMap"];
        assert_eq!(hashmap.type_params[0].bounds, vec!["Hashable".to_string()]);
    }

    #[test]
    fn stdlib_use_registers_functions() {
        let mut program = Program::new("main");
        program.uses.push(UseDecl {
            path: "math".to_string(),
            is_stdlib: true,
            span: Span::synthetic(),
        });
        let (ctx, reporter) = collect(&program);
        assert!(!reporter.has_errors());
        let sqrt = ctx.functions.get("sqrt").expect("sqrt registered");
        assert!(sqrt.is_stdlib);
        assert!(ctx.constants.contains_key("PI"));
    }

    #[test]
    fn unknown_stdlib_module_is_reported() {
        let mut program = Program::new("main");
        program.uses.push(UseDecl {
            path: "there/is/none".to_string(),
            is_stdlib: true,
            span: Span::synthetic(),
        });
        let (_, reporter) = collect(&program);
        assert!(reporter.has_code(codes::CE2001));
    }

    #[test]
    fn duplicate_function_reported_once() {
        let mut program = Program::new("main");
        program.items.push(Item::Function(empty_fn("twice")));
        program.items.push(Item::Function(empty_fn("twice")));
        let (ctx, reporter) = collect(&program);
        assert!(reporter.has_code(codes::CE2046));
        assert!(ctx.functions.contains_key("twice"));
    }

    #[test]
    fn generic_function_goes_to_template_table_only() {
        let mut program = Program::new("main");
        let mut decl = empty_fn("pair");
        decl.type_params = vec![TypeParamDecl::plain("T")];
        decl.params = vec![
            Param::new("x", Type::TypeParam("T".to_string())),
            Param::new("y", Type::TypeParam("T".to_string())),
        ];
        decl.return_type = Type::I32;
        program.items.push(Item::Function(decl));

        let (ctx, reporter) = collect(&program);
        assert!(!reporter.has_errors());
        assert!(ctx.generic_functions.contains_key("pair"));
        assert!(!ctx.functions.contains_key("pair"));
    }

    #[test]
    fn primitives_satisfy_hashable() {
        let (ctx, _) = collect(&Program::new("main"));
        assert!(ctx.satisfies_perk(&Type::I32, "Hashable"));
        assert!(ctx.satisfies_perk(&Type::STRING, "Hashable"));
        assert!(!ctx.satisfies_perk(&Type::F64, "Hashable"));
    }
}
