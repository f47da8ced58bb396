//! AST for the Sushi language, as delivered by the parser and annotated by
//! the semantic passes. Annotation fields are `Option`s written by the type
//! validator and read (never re-derived) by the IR emitter.

use serde::{Deserialize, Serialize};
use sushi_diagnostics::Span;

pub mod types;
pub use types::{
    mangle_function_name, mangle_generic_name, BuiltinKind, EnumType, EnumVariant, RefMode,
    StructType, Type,
};

/// Root of one compilation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Unit name, used for cross-unit visibility checks
    pub unit: String,
    pub uses: Vec<UseDecl>,
    pub items: Vec<Item>,
}

impl Program {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            uses: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut FunctionDecl> {
        self.items.iter_mut().filter_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }
}

/// `use <io/stdio>` or `use "local/module"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseDecl {
    pub path: String,
    pub is_stdlib: bool,
    pub span: Span,
}

/// Top-level declarations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Const(ConstDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Perk(PerkDecl),
    Extend(ExtendDecl),
    Function(FunctionDecl),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstDecl {
    pub name: String,
    pub ty: Type,
    pub value: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    pub type_params: Vec<TypeParamDecl>,
    pub fields: Vec<FieldDecl>,
    pub span: Span,
}

impl StructDecl {
    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    pub type_params: Vec<TypeParamDecl>,
    pub variants: Vec<VariantDecl>,
    pub span: Span,
}

impl EnumDecl {
    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDecl {
    pub name: String,
    pub associated_types: Vec<Type>,
    pub span: Span,
}

/// Generic type parameter with optional perk bounds: `T`, `K: Hashable`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeParamDecl {
    pub name: String,
    pub bounds: Vec<String>,
}

impl TypeParamDecl {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bounds: Vec::new(),
        }
    }
}

/// Trait definition: `perk Printable: fn describe(self) string`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerkDecl {
    pub name: String,
    pub methods: Vec<MethodSig>,
    pub span: Span,
}

/// A required method signature inside a perk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub err_type: Option<Type>,
}

/// `extend T: fn …` (extension methods) or `extend T with Perk: fn …`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendDecl {
    pub target: Type,
    /// Type parameters when extending a generic base, e.g. `extend List<T>`
    pub type_params: Vec<TypeParamDecl>,
    pub perk: Option<String>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

/// Cross-unit visibility of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Function definition. `fn f(i32 x) T` returns `Result<T, StdError>`;
/// `fn f(i32 x) T | E` returns `Result<T, E>`. The wrapped form is computed
/// by the collector, never stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub type_params: Vec<TypeParamDecl>,
    pub params: Vec<Param>,
    /// Declared success type T (defaults to `~`)
    pub return_type: Type,
    /// Declared error type E in `T | E`; None means StdError
    pub err_type: Option<Type>,
    pub visibility: Visibility,
    pub body: Block,
    pub span: Span,
}

impl FunctionDecl {
    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Statement>,
}

impl Block {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Let(LetStmt),
    Rebind(RebindStmt),
    Return(ReturnStmt),
    If(IfStmt),
    While(WhileStmt),
    Foreach(ForeachStmt),
    Match(MatchStmt),
    Print(PrintStmt),
    Expr(ExprStmt),
    Break(Span),
    Continue(Span),
}

impl Statement {
    pub fn span(&self) -> &Span {
        match self {
            Statement::Let(s) => &s.span,
            Statement::Rebind(s) => &s.span,
            Statement::Return(s) => &s.span,
            Statement::If(s) => &s.span,
            Statement::While(s) => &s.span,
            Statement::Foreach(s) => &s.span,
            Statement::Match(s) => &s.span,
            Statement::Print(s) => &s.span,
            Statement::Expr(s) => &s.span,
            Statement::Break(span) | Statement::Continue(span) => span,
        }
    }
}

/// `let T name = init`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetStmt {
    pub name: String,
    pub declared_type: Type,
    pub init: Option<Expression>,
    pub span: Span,
}

/// `name := value` or `obj.field := value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebindStmt {
    pub target: Expression,
    pub value: Expression,
    pub span: Span,
}

/// `return Result.Ok(x)` / `return Result.Err(e)`. A bare `return` parses
/// with `value: None` and is rejected by the validator (CE2030).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStmt {
    pub value: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfStmt {
    pub condition: Expression,
    pub then_block: Block,
    pub else_block: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileStmt {
    pub condition: Expression,
    pub body: Block,
    pub span: Span,
}

/// `foreach(item in iterable): body`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeachStmt {
    pub item: String,
    /// Explicit item type if the source declared one
    pub declared_item_type: Option<Type>,
    /// Resolved element type, set by the validator
    pub item_type: Option<Type>,
    pub iterable: Expression,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchStmt {
    pub scrutinee: Expression,
    pub arms: Vec<MatchArm>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    /// `_` — must be the last arm
    Wildcard(Span),
    Enum(EnumPattern),
    /// `Own(inner)` — descends through Own<U> into U
    Own(Box<Pattern>, Span),
}

impl Pattern {
    pub fn span(&self) -> &Span {
        match self {
            Pattern::Wildcard(span) => span,
            Pattern::Enum(p) => &p.span,
            Pattern::Own(_, span) => span,
        }
    }
}

/// `EnumName.Variant(bindings…)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumPattern {
    pub enum_name: String,
    pub variant: String,
    pub bindings: Vec<PatternBinding>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternBinding {
    /// Capture the payload slot into a name
    Name(String),
    /// `_` — discard the slot
    Discard,
    /// Nested enum pattern; the slot's type must be an enum
    Enum(EnumPattern),
    /// `Own(binding)`; the slot's type must be Own<U>
    Own(Box<PatternBinding>),
}

/// `println "{x}"` / `print "{x}"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintStmt {
    pub value: Expression,
    pub newline: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprStmt {
    pub expr: Expression,
    pub span: Span,
}

/// Binary operators. `And`/`Or` short-circuit; `Xor` evaluates both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// How a method call was resolved; written by the validator so the emitter
/// dispatches without re-deriving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MethodDispatch {
    /// Built-in method on a primitive receiver (string/int/float/bool)
    BuiltinPrimitive,
    /// Built-in method on Result/Maybe/Own/HashMap/List/array/file receivers
    BuiltinGeneric,
    /// Perk-provided method; the perk name
    Perk(String),
    /// Auto-derived hash() on a struct or enum
    AutoHash,
    /// User extension method; the registered function symbol
    Extension(String),
}

/// An expression node: parsed kind + source span + the type annotation the
/// validator writes; the emitter reads it and never re-infers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub kind: ExprKind,
    pub span: Span,
    /// Inferred type, set by the type validator
    pub ty: Option<Type>,
}

impl Expression {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: None,
        }
    }

    pub fn int(value: i128) -> Self {
        Self::new(ExprKind::IntLiteral(value), Span::synthetic())
    }

    pub fn float(value: f64) -> Self {
        Self::new(ExprKind::FloatLiteral(value), Span::synthetic())
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ExprKind::BoolLiteral(value), Span::synthetic())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ExprKind::StringLiteral(value.into()), Span::synthetic())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Name(name.into()), Span::synthetic())
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Self {
        Self::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            Span::synthetic(),
        )
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::new(
            ExprKind::Call {
                callee: callee.into(),
                args,
            },
            Span::synthetic(),
        )
    }

    pub fn method_call(receiver: Expression, method: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::new(
            ExprKind::MethodCall {
                receiver: Box::new(receiver),
                method: method.into(),
                args,
                inferred_return_type: None,
                dispatch: None,
            },
            Span::synthetic(),
        )
    }

    pub fn dot_call(target: impl Into<String>, name: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::new(
            ExprKind::DotCall {
                target: target.into(),
                name: name.into(),
                args,
            },
            Span::synthetic(),
        )
    }

    pub fn enum_constructor(
        enum_name: impl Into<String>,
        variant: impl Into<String>,
        args: Vec<Expression>,
    ) -> Self {
        Self::new(
            ExprKind::EnumConstructor {
                enum_name: enum_name.into(),
                variant: variant.into(),
                args,
                resolved_enum_type: None,
            },
            Span::synthetic(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    IntLiteral(i128),
    FloatLiteral(f64),
    BoolLiteral(bool),
    StringLiteral(String),
    /// `"sum is {a + b}"` — literal and expression pieces
    InterpolatedString(Vec<InterpolationPart>),
    Name(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    /// Free function call. For generic functions the validator rewrites
    /// `callee` to the mangled monomorph name.
    Call {
        callee: String,
        args: Vec<Expression>,
    },
    MethodCall {
        receiver: Box<Expression>,
        method: String,
        args: Vec<Expression>,
        /// Set by the validator
        inferred_return_type: Option<Type>,
        /// Set by the validator
        dispatch: Option<MethodDispatch>,
    },
    /// `X.Y(args)` with a bare name on the left: ambiguous between an enum
    /// constructor and a method call until the validator rewrites it into
    /// `EnumConstructor` or `MethodCall`.
    DotCall {
        target: String,
        name: String,
        args: Vec<Expression>,
    },
    MemberAccess {
        object: Box<Expression>,
        field: String,
    },
    IndexAccess {
        object: Box<Expression>,
        index: Box<Expression>,
    },
    /// `[a, b, c]` — fixed array literal
    ArrayLiteral(Vec<Expression>),
    /// `from([a, b, c])` — dynamic array seeded from a literal
    DynArrayFrom(Vec<Expression>),
    /// Empty dynamic array of a declared element type
    DynArrayNew {
        element_type: Type,
    },
    /// `Name(field: value, …)` — struct construction with named arguments
    StructConstructor {
        name: String,
        args: Vec<ConstructorArg>,
        /// Set by the validator (the concrete monomorph for generics)
        resolved_struct_type: Option<StructType>,
    },
    /// `Enum.Variant(args…)` after validator resolution
    EnumConstructor {
        enum_name: String,
        variant: String,
        args: Vec<Expression>,
        /// Set by the validator (the concrete monomorph for generics)
        resolved_enum_type: Option<EnumType>,
    },
    Cast {
        expr: Box<Expression>,
        target: Type,
    },
    /// `start..end` (exclusive) or `start..=end` (inclusive)
    Range {
        start: Box<Expression>,
        end: Box<Expression>,
        inclusive: bool,
    },
    /// `expr??` — early-return on Err/None. All annotation fields are set by
    /// the validator; the emitter only reads them.
    Try {
        inner: Box<Expression>,
        inferred_inner_type: Option<Type>,
        inferred_unwrapped_type: Option<Type>,
        inferred_success_tag: Option<u32>,
        inferred_error_type: Option<Type>,
        inferred_func_return_type: Option<Type>,
    },
    /// `&peek x` / `&poke x`
    Borrow {
        mode: RefMode,
        expr: Box<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InterpolationPart {
    Literal(String),
    Expr(Expression),
}

/// One argument in a struct constructor; named or positional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructorArg {
    pub name: Option<String>,
    pub value: Expression,
}

impl ConstructorArg {
    pub fn named(name: impl Into<String>, value: Expression) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }

    pub fn positional(value: Expression) -> Self {
        Self { name: None, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_roundtrips_through_json() {
        let mut program = Program::new("main");
        program.uses.push(UseDecl {
            path: "io/stdio".to_string(),
            is_stdlib: true,
            span: Span::synthetic(),
        });
        program.items.push(Item::Function(FunctionDecl {
            name: "main".to_string(),
            type_params: vec![],
            params: vec![],
            return_type: Type::I32,
            err_type: None,
            visibility: Visibility::Public,
            body: Block::new(vec![Statement::Return(ReturnStmt {
                value: Some(Expression::enum_constructor(
                    "Result",
                    "Ok",
                    vec![Expression::int(0)],
                )),
                span: Span::synthetic(),
            })]),
            span: Span::synthetic(),
        }));

        let json = serde_json::to_string(&program).expect("serialize");
        let back: Program = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(program, back);
    }

    #[test]
    fn expression_builders_have_no_annotations() {
        let expr = Expression::method_call(Expression::name("m"), "size", vec![]);
        assert!(expr.ty.is_none());
        match expr.kind {
            ExprKind::MethodCall {
                inferred_return_type,
                dispatch,
                ..
            } => {
                assert!(inferred_return_type.is_none());
                assert!(dispatch.is_none());
            }
            _ => panic!("expected method call"),
        }
    }

    #[test]
    fn statement_spans() {
        let stmt = Statement::Break(Span::new("x.sushi", 3, 1, 5));
        assert_eq!(stmt.span().line, 3);
    }
}
