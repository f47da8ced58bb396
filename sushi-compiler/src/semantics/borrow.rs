//! Borrow checking: at most one `&poke` borrow XOR any number of `&peek`
//! borrows per local, no use while poke-borrowed, no move or destroy
//! while borrowed, no use after a move or destroy. Borrow lifetimes are
//! expression-scoped — the language has no lifetime annotations — so
//! every statement boundary releases the borrows taken inside it; the
//! moved and destroyed states stick for the rest of the function.

use crate::context::CompilerContext;
use std::collections::HashMap;
use sushi_ast::{
    Block, ExprKind, Expression, InterpolationPart, RefMode, Statement,
};
use sushi_diagnostics::{codes, DiagnosticEngine, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BorrowState {
    Unborrowed,
    /// Shared borrows; the count only matters for release bookkeeping.
    Peek(u32),
    Poke,
    /// The value left through a return; the name is dead afterwards.
    Moved,
    Destroyed,
}

pub struct BorrowChecker<'a> {
    reporter: &'a mut DiagnosticEngine,
    states: HashMap<String, BorrowState>,
}

impl<'a> BorrowChecker<'a> {
    pub fn new(reporter: &'a mut DiagnosticEngine) -> Self {
        Self {
            reporter,
            states: HashMap::new(),
        }
    }

    pub fn run(&mut self, ctx: &CompilerContext) {
        for decl in ctx.function_bodies.values() {
            self.states.clear();
            self.check_block(&decl.body);
        }
    }

    fn check_block(&mut self, block: &Block) {
        let snapshot = self.states.clone();
        for stmt in &block.statements {
            self.check_statement(stmt);
            // Expression scope ends with the statement.
            self.release_borrows();
        }
        // Moves happen on return paths. Statements after the return inside
        // this block are checked against the moved state; once the block is
        // left on the fallthrough path the return did not run, so sibling
        // blocks must not see it. Destroys persist.
        for (name, state) in self.states.iter_mut() {
            if *state == BorrowState::Moved {
                *state = snapshot
                    .get(name)
                    .copied()
                    .unwrap_or(BorrowState::Unborrowed);
            }
        }
    }

    fn check_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Let(s) => {
                if let Some(init) = &s.init {
                    self.check_expression(init);
                }
            }
            Statement::Rebind(s) => {
                self.check_expression(&s.target);
                self.check_expression(&s.value);
            }
            Statement::Return(s) => {
                if let Some(value) = &s.value {
                    self.check_expression(value);
                    // Returning a local moves it; anything the checker
                    // still walks after this point must not touch it.
                    if let ExprKind::EnumConstructor { args, .. } = &value.kind {
                        for arg in args {
                            if let ExprKind::Name(name) = &arg.kind {
                                self.check_move(name, &arg.span);
                            }
                        }
                    }
                }
            }
            Statement::If(s) => {
                self.check_expression(&s.condition);
                self.release_borrows();
                self.check_block(&s.then_block);
                if let Some(else_block) = &s.else_block {
                    self.check_block(else_block);
                }
            }
            Statement::While(s) => {
                self.check_expression(&s.condition);
                self.release_borrows();
                self.check_block(&s.body);
            }
            Statement::Foreach(s) => {
                self.check_expression(&s.iterable);
                self.release_borrows();
                self.check_block(&s.body);
            }
            Statement::Match(s) => {
                self.check_expression(&s.scrutinee);
                self.release_borrows();
                for arm in &s.arms {
                    self.check_block(&arm.body);
                }
            }
            Statement::Print(s) => self.check_expression(&s.value),
            Statement::Expr(s) => self.check_expression(&s.expr),
            Statement::Break(_) | Statement::Continue(_) => {}
        }
    }

    fn check_expression(&mut self, expr: &Expression) {
        match &expr.kind {
            ExprKind::Borrow { mode, expr: inner } => {
                self.check_expression(inner);
                if let ExprKind::Name(name) = &inner.kind {
                    self.take_borrow(name, *mode, &expr.span);
                }
            }
            ExprKind::Name(name) => self.check_use(name, &expr.span),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.check_expression(lhs);
                self.check_expression(rhs);
            }
            ExprKind::Unary { expr: inner, .. } => self.check_expression(inner),
            ExprKind::Call { args, .. } | ExprKind::DotCall { args, .. } => {
                for arg in args {
                    self.check_expression(arg);
                }
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
                ..
            } => {
                self.check_expression(receiver);
                for arg in args {
                    self.check_expression(arg);
                }
                if method == "destroy" {
                    if let ExprKind::Name(name) = &receiver.kind {
                        self.check_destroy(name, &expr.span);
                    }
                }
            }
            ExprKind::EnumConstructor { args, .. } => {
                for arg in args {
                    self.check_expression(arg);
                }
            }
            ExprKind::StructConstructor { args, .. } => {
                for arg in args {
                    self.check_expression(&arg.value);
                }
            }
            ExprKind::MemberAccess { object, .. } => self.check_expression(object),
            ExprKind::IndexAccess { object, index } => {
                self.check_expression(object);
                self.check_expression(index);
            }
            ExprKind::ArrayLiteral(items) | ExprKind::DynArrayFrom(items) => {
                for item in items {
                    self.check_expression(item);
                }
            }
            ExprKind::InterpolatedString(parts) => {
                for part in parts {
                    if let InterpolationPart::Expr(e) = part {
                        self.check_expression(e);
                    }
                }
            }
            ExprKind::Range { start, end, .. } => {
                self.check_expression(start);
                self.check_expression(end);
            }
            ExprKind::Try { inner, .. } => self.check_expression(inner),
            ExprKind::Cast { expr: inner, .. } => self.check_expression(inner),
            _ => {}
        }
    }

    fn take_borrow(&mut self, name: &str, mode: RefMode, span: &Span) {
        let state = self
            .states
            .get(name)
            .copied()
            .unwrap_or(BorrowState::Unborrowed);
        let next = match (state, mode) {
            (BorrowState::Destroyed, _) => {
                self.reporter.emit_error(
                    codes::CE2024,
                    format!("cannot borrow `{}`: it was destroyed", name),
                    span.clone(),
                );
                return;
            }
            (BorrowState::Moved, _) => {
                self.reporter.emit_error(
                    codes::CE2605,
                    format!("cannot borrow `{}`: it was moved", name),
                    span.clone(),
                );
                return;
            }
            (BorrowState::Unborrowed, RefMode::Peek) => BorrowState::Peek(1),
            (BorrowState::Peek(n), RefMode::Peek) => BorrowState::Peek(n + 1),
            (BorrowState::Unborrowed, RefMode::Poke) => BorrowState::Poke,
            (BorrowState::Poke, RefMode::Poke) => {
                self.reporter.emit_error(
                    codes::CE2601,
                    format!("cannot borrow `{}` as poke more than once", name),
                    span.clone(),
                );
                return;
            }
            (BorrowState::Peek(_), RefMode::Poke) => {
                self.reporter.emit_error(
                    codes::CE2602,
                    format!("cannot borrow `{}` as poke while it is peek-borrowed", name),
                    span.clone(),
                );
                return;
            }
            (BorrowState::Poke, RefMode::Peek) => {
                self.reporter.emit_error(
                    codes::CE2603,
                    format!("cannot borrow `{}` as peek while it is poke-borrowed", name),
                    span.clone(),
                );
                return;
            }
        };
        self.states.insert(name.to_string(), next);
    }

    fn check_use(&mut self, name: &str, span: &Span) {
        match self.states.get(name) {
            Some(BorrowState::Poke) => {
                self.reporter.emit_error(
                    codes::CE2603,
                    format!("cannot use `{}` while it is poke-borrowed", name),
                    span.clone(),
                );
            }
            Some(BorrowState::Moved) => {
                self.reporter.emit_error(
                    codes::CE2605,
                    format!("cannot use `{}`: it was moved", name),
                    span.clone(),
                );
            }
            Some(BorrowState::Destroyed) => {
                self.reporter.emit_error(
                    codes::CE2024,
                    format!("cannot use `{}`: it was destroyed", name),
                    span.clone(),
                );
            }
            _ => {}
        }
    }

    fn check_destroy(&mut self, name: &str, span: &Span) {
        match self.states.get(name) {
            Some(BorrowState::Peek(_)) | Some(BorrowState::Poke) => {
                self.reporter.emit_error(
                    codes::CE2604,
                    format!("cannot destroy `{}` while it is borrowed", name),
                    span.clone(),
                );
            }
            Some(BorrowState::Moved) => {
                self.reporter.emit_error(
                    codes::CE2605,
                    format!("cannot destroy `{}`: it was moved", name),
                    span.clone(),
                );
            }
            _ => {
                self.states
                    .insert(name.to_string(), BorrowState::Destroyed);
            }
        }
    }

    fn check_move(&mut self, name: &str, span: &Span) {
        match self.states.get(name) {
            Some(BorrowState::Peek(_)) | Some(BorrowState::Poke) => {
                self.reporter.emit_error(
                    codes::CE2604,
                    format!("cannot move `{}` out while it is borrowed", name),
                    span.clone(),
                );
            }
            Some(BorrowState::Destroyed) => {
                self.reporter.emit_error(
                    codes::CE2024,
                    format!("cannot move `{}`: it was destroyed", name),
                    span.clone(),
                );
            }
            _ => {
                self.states.insert(name.to_string(), BorrowState::Moved);
            }
        }
    }

    fn release_borrows(&mut self) {
        for state in self.states.values_mut() {
            if matches!(state, BorrowState::Peek(_) | BorrowState::Poke) {
                *state = BorrowState::Unborrowed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sushi_ast::Type;

    fn borrow_expr(mode: RefMode, name: &str) -> Expression {
        Expression::new(
            ExprKind::Borrow {
                mode,
                expr: Box::new(Expression::name(name)),
            },
            Span::synthetic(),
        )
    }

    fn run_block(block: Block) -> DiagnosticEngine {
        let mut reporter = DiagnosticEngine::new("t.sushi");
        let mut checker = BorrowChecker::new(&mut reporter);
        checker.check_block(&block);
        drop(checker);
        reporter
    }

    fn call_with(args: Vec<Expression>) -> Statement {
        Statement::Expr(sushi_ast::ExprStmt {
            expr: Expression::call("takes", args),
            span: Span::synthetic(),
        })
    }

    #[test]
    fn two_peeks_are_fine() {
        let reporter = run_block(Block::new(vec![call_with(vec![
            borrow_expr(RefMode::Peek, "x"),
            borrow_expr(RefMode::Peek, "x"),
        ])]));
        assert!(!reporter.has_errors());
    }

    #[test]
    fn double_poke_is_rejected() {
        let reporter = run_block(Block::new(vec![call_with(vec![
            borrow_expr(RefMode::Poke, "x"),
            borrow_expr(RefMode::Poke, "x"),
        ])]));
        assert!(reporter.has_code(codes::CE2601));
    }

    #[test]
    fn poke_after_peek_is_rejected() {
        let reporter = run_block(Block::new(vec![call_with(vec![
            borrow_expr(RefMode::Peek, "x"),
            borrow_expr(RefMode::Poke, "x"),
        ])]));
        assert!(reporter.has_code(codes::CE2602));
    }

    #[test]
    fn use_while_poke_borrowed_is_rejected() {
        let reporter = run_block(Block::new(vec![call_with(vec![
            borrow_expr(RefMode::Poke, "x"),
            Expression::name("x"),
        ])]));
        assert!(reporter.has_code(codes::CE2603));
    }

    #[test]
    fn borrows_release_at_statement_boundaries() {
        let reporter = run_block(Block::new(vec![
            call_with(vec![borrow_expr(RefMode::Poke, "x")]),
            call_with(vec![borrow_expr(RefMode::Poke, "x")]),
        ]));
        assert!(!reporter.has_errors());
    }

    #[test]
    fn destroy_while_borrowed_is_rejected() {
        let destroy = Statement::Expr(sushi_ast::ExprStmt {
            expr: Expression::call(
                "takes",
                vec![
                    borrow_expr(RefMode::Peek, "x"),
                    Expression::method_call(Expression::name("x"), "destroy", vec![]),
                ],
            ),
            span: Span::synthetic(),
        });
        let reporter = run_block(Block::new(vec![destroy]));
        assert!(reporter.has_code(codes::CE2604));
    }

    fn return_ok_of(name: &str) -> Statement {
        Statement::Return(sushi_ast::ReturnStmt {
            value: Some(Expression::enum_constructor(
                "Result",
                "Ok",
                vec![Expression::name(name)],
            )),
            span: Span::synthetic(),
        })
    }

    #[test]
    fn use_after_move_is_rejected() {
        // `x` leaves through the return; the statement after it (dead
        // code, but still checked) must not touch it.
        let reporter = run_block(Block::new(vec![
            return_ok_of("x"),
            call_with(vec![Expression::name("x")]),
        ]));
        assert!(reporter.has_code(codes::CE2605));
    }

    #[test]
    fn destroy_after_move_is_rejected() {
        let reporter = run_block(Block::new(vec![
            return_ok_of("x"),
            Statement::Expr(sushi_ast::ExprStmt {
                expr: Expression::method_call(Expression::name("x"), "destroy", vec![]),
                span: Span::synthetic(),
            }),
        ]));
        assert!(reporter.has_code(codes::CE2605));
    }

    #[test]
    fn moves_in_a_branch_do_not_poison_siblings() {
        // if c: return Result.Ok(x) else: takes(x) — the else path runs
        // only when the move did not.
        let reporter = run_block(Block::new(vec![Statement::If(sushi_ast::IfStmt {
            condition: Expression::boolean(true),
            then_block: Block::new(vec![return_ok_of("x")]),
            else_block: Some(Block::new(vec![call_with(vec![Expression::name("x")])])),
            span: Span::synthetic(),
        })]));
        assert!(!reporter.has_errors());
    }

    #[test]
    fn use_after_destroy_is_rejected() {
        let reporter = run_block(Block::new(vec![
            Statement::Expr(sushi_ast::ExprStmt {
                expr: Expression::method_call(Expression::name("x"), "destroy", vec![]),
                span: Span::synthetic(),
            }),
            Statement::Let(sushi_ast::LetStmt {
                name: "y".to_string(),
                declared_type: Type::I32,
                init: Some(Expression::name("x")),
                span: Span::synthetic(),
            }),
        ]));
        assert!(reporter.has_code(codes::CE2024));
    }
}
