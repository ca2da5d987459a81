//! The constant folder: a pure recursive evaluator over expression trees.
//!
//! Used only where the grammar requires a compile-time constant: array
//! dimensions, constant initializers, and global initializers.

use super::ast::*;
use super::lower::LowerError;
use super::symbol::{Binding, SymbolTable};

/// Fold `expr` to an integer, consulting the environment for constants only.
pub fn fold(expr: &Expr, symbols: &SymbolTable) -> Result<i32, LowerError> {
    match expr {
        Expr::Num(v) => Ok(*v),
        Expr::LVal(lval) => match symbols.lookup(lval.name)? {
            Binding::Const(v) if lval.idx.is_empty() => Ok(*v),
            _ => Err(LowerError::NotConstant(lval.name)),
        },
        Expr::Unary(op, inner) => {
            let v = fold(inner, symbols)?;
            Ok(match op {
                UnaryOp::Pos => v,
                UnaryOp::Neg => v.wrapping_neg(),
                UnaryOp::Not => (v == 0) as i32,
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            // Both operands fold even for `&&`/`||`: there is nothing to
            // short-circuit at compile time.
            let l = fold(lhs, symbols)?;
            let r = fold(rhs, symbols)?;
            apply(*op, l, r)
        }
        Expr::Call { callee, .. } => Err(LowerError::NotConstant(*callee)),
    }
}

fn apply(op: BinOp, l: i32, r: i32) -> Result<i32, LowerError> {
    Ok(match op {
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::Div => {
            if r == 0 {
                return Err(LowerError::DivisionByZero);
            }
            l.wrapping_div(r)
        }
        BinOp::Mod => {
            if r == 0 {
                return Err(LowerError::DivisionByZero);
            }
            l.wrapping_rem(r)
        }
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Lt => (l < r) as i32,
        BinOp::Le => (l <= r) as i32,
        BinOp::Gt => (l > r) as i32,
        BinOp::Ge => (l >= r) as i32,
        BinOp::Eq => (l == r) as i32,
        BinOp::Ne => (l != r) as i32,
        BinOp::And => (l != 0 && r != 0) as i32,
        BinOp::Or => (l != 0 || r != 0) as i32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Id;

    fn fold_src(src: &str) -> Result<i32, LowerError> {
        // Parse `src` as the body of a return statement to get an Expr.
        let unit = crate::front::parse(&format!("int main() {{ return {src}; }}")).unwrap();
        let Item::Func(f) = &unit.items[0] else {
            panic!()
        };
        let BlockItem::Stmt(Stmt::Return(Some(expr))) = &f.body.items[0] else {
            panic!()
        };
        fold(expr, &SymbolTable::new())
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(fold_src("1 + 2 * 3").unwrap(), 7);
        assert_eq!(fold_src("(1 + 2) * 3").unwrap(), 9);
        assert_eq!(fold_src("7 / 2 + 7 % 2").unwrap(), 4);
        assert_eq!(fold_src("-5 + +2").unwrap(), -3);
    }

    #[test]
    fn comparisons_and_logic_normalize() {
        assert_eq!(fold_src("3 < 4 && 4 < 10").unwrap(), 1);
        assert_eq!(fold_src("5 && 0").unwrap(), 0);
        assert_eq!(fold_src("5 || 0").unwrap(), 1);
        assert_eq!(fold_src("!7").unwrap(), 0);
        assert_eq!(fold_src("!0").unwrap(), 1);
        assert_eq!(fold_src("2 == 2").unwrap(), 1);
        assert_eq!(fold_src("2 != 2").unwrap(), 0);
    }

    #[test]
    fn division_by_zero_fails() {
        assert!(matches!(fold_src("1 / 0"), Err(LowerError::DivisionByZero)));
        assert!(matches!(fold_src("1 % 0"), Err(LowerError::DivisionByZero)));
    }

    #[test]
    fn constants_resolve_and_variables_refuse() {
        let mut symbols = SymbolTable::new();
        symbols
            .insert(Id::new("c".to_string()), Binding::Const(6))
            .unwrap();
        let unit = crate::front::parse("int main() { return c * 7; }").unwrap();
        let Item::Func(f) = &unit.items[0] else {
            panic!()
        };
        let BlockItem::Stmt(Stmt::Return(Some(expr))) = &f.body.items[0] else {
            panic!()
        };
        assert_eq!(fold(expr, &symbols).unwrap(), 42);
        assert!(matches!(fold_src("c * 7"), Err(LowerError::UnknownName(_))));
    }

    #[test]
    fn folding_is_idempotent() {
        let first = fold_src("1 + 2 * 3 - 4 / 2").unwrap();
        let second = fold_src("1 + 2 * 3 - 4 / 2").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn wrap_around_is_twos_complement() {
        assert_eq!(fold_src("2147483647 + 1").unwrap(), i32::MIN);
    }
}
