//! The compilation context: every symbol table the passes share, threaded
//! through each pass as a borrow. Mutated by the collector and the
//! monomorphizer; sealed before emission, after which it is read-only.

use std::collections::HashMap;

use sushi_ast::{
    mangle_generic_name, EnumType, EnumVariant, Expression, FunctionDecl, Param, PerkDecl,
    StructType, Type, TypeParamDecl, Visibility,
};
use sushi_diagnostics::Span;

/// A type's display name flattened into a symbol-safe key.
pub fn sanitize_type_key(key: &str) -> String {
    key.replace(['<', '>', ',', ' ', '[', ']', '*', '&'], "_")
}

/// The compiled symbol of an extension method: `Point__length`.
pub fn extension_symbol(target_display: &str, method: &str) -> String {
    format!("{}__{}", sanitize_type_key(target_display), method)
}

/// The compiled symbol of a perk-implementation method:
/// `Point__Printable__describe`.
pub fn perk_method_symbol(target_display: &str, perk: &str, method: &str) -> String {
    format!("{}__{}__{}", sanitize_type_key(target_display), perk, method)
}

/// A `const` entry: declared type, initializer expression, declaration site.
#[derive(Debug, Clone)]
pub struct ConstInfo {
    pub ty: Type,
    pub value: Expression,
    pub span: Span,
}

/// Signature of a callable function (concrete; monomorphs included).
#[derive(Debug, Clone)]
pub struct FunctionSig {
    pub name: String,
    pub params: Vec<Param>,
    /// Always the wrapped form: Result<T, E>
    pub return_type: Type,
    pub visibility: Visibility,
    pub unit: String,
    pub is_stdlib: bool,
    pub is_library: bool,
}

/// Generic enum template; variant payloads may mention `TypeParam`s.
#[derive(Debug, Clone)]
pub struct GenericEnumDef {
    pub name: String,
    pub type_params: Vec<TypeParamDecl>,
    pub variants: Vec<EnumVariant>,
    pub span: Span,
}

/// Generic struct template; field types may mention `TypeParam`s.
#[derive(Debug, Clone)]
pub struct GenericStructDef {
    pub name: String,
    pub type_params: Vec<TypeParamDecl>,
    pub fields: Vec<(String, Type)>,
    pub span: Span,
}

/// A registered extension method on a concrete receiver type.
#[derive(Debug, Clone)]
pub struct ExtensionMethod {
    pub receiver: Type,
    /// Mangled symbol the method compiles to, e.g. `Point__length`
    pub symbol: String,
    pub decl: FunctionDecl,
}

/// Perk implementation entry: explicit bodies or the auto-derived sentinel.
#[derive(Debug, Clone)]
pub enum PerkImpl {
    /// Satisfied without user code (primitives and auto-derived hash)
    AutoDerived,
    Explicit(Vec<FunctionDecl>),
}

/// All symbol tables. One value per compilation.
#[derive(Debug, Default)]
pub struct CompilerContext {
    pub constants: HashMap<String, ConstInfo>,
    /// Concrete functions, keyed by (possibly mangled) symbol name
    pub functions: HashMap<String, FunctionSig>,
    /// Generic function templates, keyed by base name
    pub generic_functions: HashMap<String, FunctionDecl>,
    /// Concrete structs; monomorphs keyed by mangled name (`Own<i32>`)
    pub structs: HashMap<String, StructType>,
    /// Concrete enums; monomorphs keyed by mangled name (`Result<i32, StdError>`)
    pub enums: HashMap<String, EnumType>,
    pub generic_structs: HashMap<String, GenericStructDef>,
    pub generic_enums: HashMap<String, GenericEnumDef>,
    /// receiver type display name -> method name -> extension method
    pub extensions: HashMap<String, HashMap<String, ExtensionMethod>>,
    /// generic base name -> method name -> generic template
    pub generic_extensions: HashMap<String, HashMap<String, FunctionDecl>>,
    pub perks: HashMap<String, PerkDecl>,
    /// (type display name, perk name) -> implementation
    pub perk_impls: HashMap<(String, String), PerkImpl>,
    /// Bodies of every function the emitter must compile, keyed by symbol
    /// name; includes monomorphized copies installed by the monomorphizer.
    pub function_bodies: HashMap<String, FunctionDecl>,
    sealed: bool,
}

impl CompilerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to read-only. Called after the semantic passes; the
    /// emitter only reads. Mutating after sealing is a compiler bug.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn assert_unsealed(&self) {
        debug_assert!(!self.sealed, "symbol tables mutated after sealing");
    }

    /// Invariant T1: a name may be a concrete function or a generic
    /// template, never both.
    pub fn is_function_name(&self, name: &str) -> bool {
        self.functions.contains_key(name) || self.generic_functions.contains_key(name)
    }

    pub fn install_function(&mut self, sig: FunctionSig, body: Option<FunctionDecl>) {
        self.assert_unsealed();
        let name = sig.name.clone();
        self.functions.insert(name.clone(), sig);
        if let Some(body) = body {
            self.function_bodies.insert(name, body);
        }
    }

    pub fn install_struct(&mut self, def: StructType) {
        self.assert_unsealed();
        self.structs.insert(def.name.clone(), def);
    }

    pub fn install_enum(&mut self, def: EnumType) {
        self.assert_unsealed();
        self.enums.insert(def.name.clone(), def);
    }

    /// Look up a concrete nominal type by name: struct first, then enum.
    pub fn named_type(&self, name: &str) -> Option<Type> {
        if let Some(s) = self.structs.get(name) {
            return Some(Type::Struct(s.clone()));
        }
        if let Some(e) = self.enums.get(name) {
            return Some(Type::Enum(e.clone()));
        }
        None
    }

    /// Look up the concrete monomorph for `base<args…>` in either table.
    pub fn monomorph(&self, base: &str, args: &[Type]) -> Option<Type> {
        self.named_type(&mangle_generic_name(base, args))
    }

    pub fn is_generic_base(&self, name: &str) -> bool {
        self.generic_structs.contains_key(name) || self.generic_enums.contains_key(name)
    }

    /// Does `ty` satisfy `perk`? Checks the impl table under the type's
    /// display name; primitives were pre-registered by the collector.
    pub fn satisfies_perk(&self, ty: &Type, perk: &str) -> bool {
        let key = (ty.to_string(), perk.to_string());
        if self.perk_impls.contains_key(&key) {
            return true;
        }
        // Auto-derived hash makes every struct/enum Hashable.
        perk == "Hashable" && matches!(ty, Type::Struct(_) | Type::Enum(_))
    }

    pub fn register_perk_impl(&mut self, type_name: String, perk: String, imp: PerkImpl) {
        self.assert_unsealed();
        self.perk_impls.insert((type_name, perk), imp);
    }

    /// All function names, for "did you mean" suggestions.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.extend(self.generic_functions.keys().cloned());
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sushi_ast::BuiltinKind;

    fn sample_sig(name: &str) -> FunctionSig {
        FunctionSig {
            name: name.to_string(),
            params: vec![],
            return_type: Type::result(Type::I32, Type::Unknown("StdError".into())),
            visibility: Visibility::Public,
            unit: "main".to_string(),
            is_stdlib: false,
            is_library: false,
        }
    }

    #[test]
    fn named_type_prefers_structs() {
        let mut ctx = CompilerContext::new();
        ctx.install_struct(StructType::new("Point", vec![("x".into(), Type::I32)]));
        ctx.install_enum(EnumType::new("Color", vec![EnumVariant::unit("Red")]));

        assert!(matches!(ctx.named_type("Point"), Some(Type::Struct(_))));
        assert!(matches!(ctx.named_type("Color"), Some(Type::Enum(_))));
        assert!(ctx.named_type("Missing").is_none());
    }

    #[test]
    fn monomorph_lookup_uses_mangled_name() {
        let mut ctx = CompilerContext::new();
        ctx.install_enum(EnumType::new(
            "Maybe<i32>",
            vec![
                EnumVariant::new("Some", vec![Type::I32]),
                EnumVariant::unit("None"),
            ],
        ));
        assert!(ctx.monomorph("Maybe", &[Type::I32]).is_some());
        assert!(ctx
            .monomorph("Maybe", &[Type::Builtin(BuiltinKind::Bool)])
            .is_none());
    }

    #[test]
    fn perk_satisfaction() {
        let mut ctx = CompilerContext::new();
        ctx.register_perk_impl("i32".into(), "Hashable".into(), PerkImpl::AutoDerived);
        assert!(ctx.satisfies_perk(&Type::I32, "Hashable"));
        assert!(!ctx.satisfies_perk(&Type::F64, "Hashable"));

        // structs are hashable through auto-derivation even without an entry
        let point = StructType::new("Point", vec![("x".into(), Type::I32)]);
        assert!(ctx.satisfies_perk(&Type::Struct(point), "Hashable"));
    }

    #[test]
    fn function_registration() {
        let mut ctx = CompilerContext::new();
        ctx.install_function(sample_sig("square"), None);
        assert!(ctx.is_function_name("square"));
        assert!(!ctx.is_function_name("cube"));
    }
}
