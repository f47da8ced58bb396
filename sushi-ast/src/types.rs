// Semantic type model
// Types compare structurally, except named nominal types (structs, enums)
// which compare by name; monomorphized names already encode their arguments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Builtin scalar and handle types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    String,
    /// The unit type, written `~`
    Blank,
    Stdin,
    Stdout,
    Stderr,
    File,
}

impl BuiltinKind {
    pub fn token(&self) -> &'static str {
        match self {
            BuiltinKind::I8 => "i8",
            BuiltinKind::I16 => "i16",
            BuiltinKind::I32 => "i32",
            BuiltinKind::I64 => "i64",
            BuiltinKind::U8 => "u8",
            BuiltinKind::U16 => "u16",
            BuiltinKind::U32 => "u32",
            BuiltinKind::U64 => "u64",
            BuiltinKind::F32 => "f32",
            BuiltinKind::F64 => "f64",
            BuiltinKind::Bool => "bool",
            BuiltinKind::String => "string",
            BuiltinKind::Blank => "~",
            BuiltinKind::Stdin => "stdin",
            BuiltinKind::Stdout => "stdout",
            BuiltinKind::Stderr => "stderr",
            BuiltinKind::File => "file",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "i8" => BuiltinKind::I8,
            "i16" => BuiltinKind::I16,
            "i32" => BuiltinKind::I32,
            "i64" => BuiltinKind::I64,
            "u8" => BuiltinKind::U8,
            "u16" => BuiltinKind::U16,
            "u32" => BuiltinKind::U32,
            "u64" => BuiltinKind::U64,
            "f32" => BuiltinKind::F32,
            "f64" => BuiltinKind::F64,
            "bool" => BuiltinKind::Bool,
            "string" => BuiltinKind::String,
            "~" => BuiltinKind::Blank,
            "stdin" => BuiltinKind::Stdin,
            "stdout" => BuiltinKind::Stdout,
            "stderr" => BuiltinKind::Stderr,
            "file" => BuiltinKind::File,
            _ => return None,
        })
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            BuiltinKind::I8
                | BuiltinKind::I16
                | BuiltinKind::I32
                | BuiltinKind::I64
                | BuiltinKind::U8
                | BuiltinKind::U16
                | BuiltinKind::U32
                | BuiltinKind::U64
        )
    }

    pub fn is_signed_integer(&self) -> bool {
        matches!(
            self,
            BuiltinKind::I8 | BuiltinKind::I16 | BuiltinKind::I32 | BuiltinKind::I64
        )
    }

    pub fn is_unsigned_integer(&self) -> bool {
        self.is_integer() && !self.is_signed_integer()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, BuiltinKind::F32 | BuiltinKind::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Width in bits for scalar kinds; None for string/blank/handles.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            BuiltinKind::I8 | BuiltinKind::U8 => Some(8),
            BuiltinKind::I16 | BuiltinKind::U16 => Some(16),
            BuiltinKind::I32 | BuiltinKind::U32 => Some(32),
            BuiltinKind::I64 | BuiltinKind::U64 => Some(64),
            BuiltinKind::F32 => Some(32),
            BuiltinKind::F64 => Some(64),
            BuiltinKind::Bool => Some(8),
            _ => None,
        }
    }
}

impl fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Reference mode: `&peek` is shared/read-only, `&poke` is exclusive/mutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefMode {
    Peek,
    Poke,
}

impl RefMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            RefMode::Peek => "peek",
            RefMode::Poke => "poke",
        }
    }
}

/// A user-defined (or monomorphized) struct. Field order is layout order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<(String, Type)>,
    /// Base name before monomorphization, e.g. "Own" for "Own<i32>"
    pub generic_base: Option<String>,
    pub generic_args: Option<Vec<Type>>,
}

impl StructType {
    pub fn new(name: impl Into<String>, fields: Vec<(String, Type)>) -> Self {
        Self {
            name: name.into(),
            fields,
            generic_base: None,
            generic_args: None,
        }
    }

    pub fn field_type(&self, field: &str) -> Option<&Type> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, ty)| ty)
    }

    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|(name, _)| name == field)
    }

    pub fn is_monomorph_of(&self, base: &str) -> bool {
        self.generic_base.as_deref() == Some(base)
    }
}

// Nominal comparison. Monomorphized names carry their type arguments
// ("Own<i32>"), so name equality subsumes argument equality.
impl PartialEq for StructType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for StructType {}

impl Hash for StructType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "struct".hash(state);
        self.name.hash(state);
    }
}

/// One enum variant with its payload types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumVariant {
    pub name: String,
    pub associated_types: Vec<Type>,
}

impl EnumVariant {
    pub fn new(name: impl Into<String>, associated_types: Vec<Type>) -> Self {
        Self {
            name: name.into(),
            associated_types,
        }
    }

    pub fn unit(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }
}

/// A tagged union. The tag is the variant's declaration index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<EnumVariant>,
    pub generic_base: Option<String>,
    pub generic_args: Option<Vec<Type>>,
}

impl EnumType {
    pub fn new(name: impl Into<String>, variants: Vec<EnumVariant>) -> Self {
        Self {
            name: name.into(),
            variants,
            generic_base: None,
            generic_args: None,
        }
    }

    pub fn variant(&self, name: &str) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.name == name)
    }

    pub fn is_monomorph_of(&self, base: &str) -> bool {
        self.generic_base.as_deref() == Some(base)
    }

    /// Result-shaped: exactly Ok/Err in that order.
    pub fn is_result_shaped(&self) -> bool {
        self.variants.len() == 2 && self.variants[0].name == "Ok" && self.variants[1].name == "Err"
    }

    /// Maybe-shaped: exactly Some/None in that order.
    pub fn is_maybe_shaped(&self) -> bool {
        self.variants.len() == 2
            && self.variants[0].name == "Some"
            && self.variants[1].name == "None"
    }
}

impl PartialEq for EnumType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for EnumType {}

impl Hash for EnumType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        "enum".hash(state);
        self.name.hash(state);
    }
}

/// The type sum. `Unknown`, `GenericRef` and `TypeParam` only exist between
/// parsing and monomorphization; none may reach the IR emitter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Builtin(BuiltinKind),
    /// Fixed-size, stack-resident array
    Array { base: Box<Type>, size: u32 },
    /// Heap triple { len: i32, cap: i32, data: *base }
    DynArray { base: Box<Type> },
    Struct(StructType),
    Enum(EnumType),
    Reference { inner: Box<Type>, mode: RefMode },
    /// Owned heap pointer, internal to Own<T>
    Pointer { pointee: Box<Type> },
    /// { current_index: i32, length: i32, data: *element }; length == -1 is a stream
    Iterator { element: Box<Type> },
    /// Sugar for Enum("Result<ok, err>", [Ok(ok), Err(err)])
    Result { ok: Box<Type>, err: Box<Type> },
    /// Unresolved generic use, e.g. Maybe<i32> before monomorphization
    GenericRef { base: String, args: Vec<Type> },
    /// Placeholder inside a generic template
    TypeParam(String),
    /// Forward reference from the parser
    Unknown(String),
}

impl Type {
    pub const I32: Type = Type::Builtin(BuiltinKind::I32);
    pub const I64: Type = Type::Builtin(BuiltinKind::I64);
    pub const U64: Type = Type::Builtin(BuiltinKind::U64);
    pub const F64: Type = Type::Builtin(BuiltinKind::F64);
    pub const BOOL: Type = Type::Builtin(BuiltinKind::Bool);
    pub const STRING: Type = Type::Builtin(BuiltinKind::String);
    pub const BLANK: Type = Type::Builtin(BuiltinKind::Blank);

    pub fn array(base: Type, size: u32) -> Type {
        Type::Array {
            base: Box::new(base),
            size,
        }
    }

    pub fn dyn_array(base: Type) -> Type {
        Type::DynArray {
            base: Box::new(base),
        }
    }

    pub fn reference(inner: Type, mode: RefMode) -> Type {
        Type::Reference {
            inner: Box::new(inner),
            mode,
        }
    }

    pub fn pointer(pointee: Type) -> Type {
        Type::Pointer {
            pointee: Box::new(pointee),
        }
    }

    pub fn iterator(element: Type) -> Type {
        Type::Iterator {
            element: Box::new(element),
        }
    }

    pub fn result(ok: Type, err: Type) -> Type {
        Type::Result {
            ok: Box::new(ok),
            err: Box::new(err),
        }
    }

    pub fn generic_ref(base: impl Into<String>, args: Vec<Type>) -> Type {
        Type::GenericRef {
            base: base.into(),
            args,
        }
    }

    pub fn builtin(&self) -> Option<BuiltinKind> {
        match self {
            Type::Builtin(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Type::Builtin(BuiltinKind::Blank))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Builtin(BuiltinKind::Bool))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::Builtin(BuiltinKind::String))
    }

    pub fn is_integer(&self) -> bool {
        self.builtin().is_some_and(|k| k.is_integer())
    }

    pub fn is_signed_integer(&self) -> bool {
        self.builtin().is_some_and(|k| k.is_signed_integer())
    }

    pub fn is_unsigned_integer(&self) -> bool {
        self.builtin().is_some_and(|k| k.is_unsigned_integer())
    }

    pub fn is_float(&self) -> bool {
        self.builtin().is_some_and(|k| k.is_float())
    }

    pub fn is_numeric(&self) -> bool {
        self.builtin().is_some_and(|k| k.is_numeric())
    }

    /// Peel any number of reference layers.
    pub fn unwrap_reference(&self) -> &Type {
        match self {
            Type::Reference { inner, .. } => inner.unwrap_reference(),
            other => other,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self.unwrap_reference() {
            Type::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType> {
        match self.unwrap_reference() {
            Type::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// True if this type (or anything it contains) is still Unknown,
    /// a GenericRef, or an unsubstituted TypeParam. Invariant U1: nothing
    /// unresolved may reach the emitter.
    pub fn contains_unresolved(&self) -> bool {
        match self {
            Type::Unknown(_) | Type::GenericRef { .. } | Type::TypeParam(_) => true,
            Type::Builtin(_) => false,
            Type::Array { base, .. } => base.contains_unresolved(),
            Type::DynArray { base } => base.contains_unresolved(),
            Type::Reference { inner, .. } => inner.contains_unresolved(),
            Type::Pointer { pointee } => pointee.contains_unresolved(),
            Type::Iterator { element } => element.contains_unresolved(),
            Type::Result { ok, err } => ok.contains_unresolved() || err.contains_unresolved(),
            // Nominal types were installed fully-resolved by the monomorphizer;
            // recursing here would loop on self-referential structs.
            Type::Struct(_) | Type::Enum(_) => false,
        }
    }

    /// True for values that transitively own heap memory and therefore need
    /// a destructor at scope exit.
    pub fn needs_cleanup(&self) -> bool {
        match self {
            Type::DynArray { .. } | Type::Pointer { .. } => true,
            Type::Struct(s) => {
                s.is_monomorph_of("Own")
                    || s.is_monomorph_of("HashMap")
                    || s.is_monomorph_of("List")
                    || s.fields.iter().any(|(_, ty)| ty.needs_cleanup())
            }
            Type::Enum(e) => e
                .variants
                .iter()
                .any(|v| v.associated_types.iter().any(Type::needs_cleanup)),
            Type::Array { base, .. } => base.needs_cleanup(),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Builtin(kind) => write!(f, "{}", kind),
            Type::Array { base, size } => write!(f, "{}[{}]", base, size),
            Type::DynArray { base } => write!(f, "{}[]", base),
            Type::Struct(s) => write!(f, "{}", s.name),
            Type::Enum(e) => write!(f, "{}", e.name),
            Type::Reference { inner, mode } => write!(f, "&{} {}", mode.keyword(), inner),
            Type::Pointer { pointee } => write!(f, "*{}", pointee),
            Type::Iterator { element } => write!(f, "Iterator<{}>", element),
            Type::Result { ok, err } => write!(f, "Result<{}, {}>", ok, err),
            Type::GenericRef { base, args } => write!(f, "{}", mangle_generic_name(base, args)),
            Type::TypeParam(name) => write!(f, "{}", name),
            Type::Unknown(name) => write!(f, "{}", name),
        }
    }
}

/// Mangled concrete name for a generic instantiation: `Base<a, b>`.
/// This exact string keys the concrete struct/enum tables.
pub fn mangle_generic_name(base: &str, args: &[Type]) -> String {
    let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    format!("{}<{}>", base, rendered.join(", "))
}

/// Mangled symbol name for a monomorphized function:
/// `compute_hash` + [i32] -> `compute_hash__i32`.
pub fn mangle_function_name(base: &str, args: &[Type]) -> String {
    let mut mangled = base.to_string();
    for arg in args {
        mangled.push_str("__");
        mangled.push_str(&type_suffix(arg));
    }
    mangled
}

/// Flat, symbol-safe spelling of a type for function-name mangling.
fn type_suffix(ty: &Type) -> String {
    match ty {
        Type::Builtin(BuiltinKind::Blank) => "blank".to_string(),
        Type::Builtin(kind) => kind.token().to_string(),
        Type::Array { base, size } => format!("arr{}_{}", size, type_suffix(base)),
        Type::DynArray { base } => format!("dynarr_{}", type_suffix(base)),
        Type::Struct(s) => sanitize_nominal(&s.name),
        Type::Enum(e) => sanitize_nominal(&e.name),
        Type::Reference { inner, mode } => format!("{}_{}", mode.keyword(), type_suffix(inner)),
        Type::Pointer { pointee } => format!("ptr_{}", type_suffix(pointee)),
        Type::Iterator { element } => format!("iter_{}", type_suffix(element)),
        Type::Result { ok, err } => format!("result_{}_{}", type_suffix(ok), type_suffix(err)),
        Type::GenericRef { base, args } => {
            let mut suffix = base.clone();
            for arg in args {
                suffix.push('_');
                suffix.push_str(&type_suffix(arg));
            }
            suffix
        }
        Type::TypeParam(name) => name.clone(),
        Type::Unknown(name) => sanitize_nominal(name),
    }
}

fn sanitize_nominal(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        assert_eq!(Type::I32.to_string(), "i32");
        assert_eq!(Type::array(Type::STRING, 4).to_string(), "string[4]");
        assert_eq!(Type::dyn_array(Type::I32).to_string(), "i32[]");
        assert_eq!(
            Type::reference(Type::BOOL, RefMode::Poke).to_string(),
            "&poke bool"
        );
        assert_eq!(
            Type::result(Type::I32, Type::Unknown("StdError".into())).to_string(),
            "Result<i32, StdError>"
        );
        assert_eq!(Type::BLANK.to_string(), "~");
    }

    #[test]
    fn mangled_generic_names() {
        assert_eq!(
            mangle_generic_name("Maybe", &[Type::I32]),
            "Maybe<i32>"
        );
        assert_eq!(
            mangle_generic_name("HashMap", &[Type::STRING, Type::I32]),
            "HashMap<string, i32>"
        );
        assert_eq!(
            mangle_generic_name("List", &[Type::generic_ref("Maybe", vec![Type::I32])]),
            "List<Maybe<i32>>"
        );
    }

    #[test]
    fn mangled_function_names() {
        assert_eq!(mangle_function_name("pair", &[Type::I32]), "pair__i32");
        assert_eq!(
            mangle_function_name("pair", &[Type::STRING]),
            "pair__string"
        );
        let maybe = Type::generic_ref("Maybe", vec![Type::I32]);
        assert_eq!(
            mangle_function_name("unwrap_all", &[maybe]),
            "unwrap_all__Maybe_i32"
        );
    }

    #[test]
    fn nominal_equality_by_name() {
        let a = StructType::new("Point", vec![("x".into(), Type::I32)]);
        let b = StructType::new("Point", vec![("x".into(), Type::I32)]);
        assert_eq!(Type::Struct(a), Type::Struct(b));

        let c = EnumType::new("Color", vec![EnumVariant::unit("Red")]);
        let d = EnumType::new("Shade", vec![EnumVariant::unit("Red")]);
        assert_ne!(Type::Enum(c), Type::Enum(d));
    }

    #[test]
    fn unresolved_detection() {
        assert!(Type::Unknown("Point".into()).contains_unresolved());
        assert!(Type::generic_ref("Maybe", vec![Type::I32]).contains_unresolved());
        assert!(Type::dyn_array(Type::TypeParam("T".into())).contains_unresolved());
        assert!(!Type::array(Type::F64, 3).contains_unresolved());
    }

    #[test]
    fn cleanup_predicate() {
        assert!(Type::dyn_array(Type::I32).needs_cleanup());
        assert!(!Type::I32.needs_cleanup());
        assert!(!Type::STRING.needs_cleanup());

        let bag = StructType::new(
            "Bag",
            vec![("items".into(), Type::dyn_array(Type::STRING))],
        );
        assert!(Type::Struct(bag).needs_cleanup());

        let point = StructType::new("Point", vec![("x".into(), Type::I32)]);
        assert!(!Type::Struct(point).needs_cleanup());
    }

    #[test]
    fn result_and_maybe_shapes() {
        let result = EnumType::new(
            "Result<i32, StdError>",
            vec![
                EnumVariant::new("Ok", vec![Type::I32]),
                EnumVariant::new("Err", vec![Type::Unknown("StdError".into())]),
            ],
        );
        assert!(result.is_result_shaped());
        assert!(!result.is_maybe_shaped());

        let maybe = EnumType::new(
            "Maybe<i32>",
            vec![
                EnumVariant::new("Some", vec![Type::I32]),
                EnumVariant::unit("None"),
            ],
        );
        assert!(maybe.is_maybe_shaped());
    }
}
