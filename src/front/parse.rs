//! The parser

use std::fmt::Debug;

use derive_more::derive::Display;

use super::ast::*;
use super::lex::*;
use crate::common::Id;

#[derive(Display)]
#[display("Parse error: {}", self.0)]
pub struct ParseError(String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub fn parse(input: &str) -> Result<CompUnit, ParseError> {
    let tokens = Lexer::new(input)
        .tokens()
        .map_err(|e| ParseError(e.to_string()))?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.comp_unit()
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind)
    }

    fn peek_at(&self, ahead: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| t.kind)
    }

    fn advance(&mut self) -> Result<Token<'src>, ParseError> {
        let tok = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or_else(|| ParseError("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(tok)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        match self.tokens.get(self.pos) {
            Some(tok) if tok.kind == kind => {
                self.pos += 1;
                Ok(*tok)
            }
            Some(tok) => Err(ParseError(format!("expected '{kind}', found {tok}"))),
            None => Err(ParseError(format!(
                "expected '{kind}', found end of input"
            ))),
        }
    }

    fn ident(&mut self) -> Result<Id, ParseError> {
        let tok = self.expect(TokenKind::Id)?;
        Ok(Id::new(tok.text.to_string()))
    }

    fn comp_unit(&mut self) -> Result<CompUnit, ParseError> {
        let mut items = Vec::new();
        while self.peek().is_some() {
            items.push(self.item()?);
        }
        Ok(CompUnit { items })
    }

    fn item(&mut self) -> Result<Item, ParseError> {
        use TokenKind::*;
        match self.peek() {
            Some(Const) => Ok(Item::Decl(self.decl()?)),
            Some(Void) => Ok(Item::Func(self.func_def()?)),
            // `int f(` starts a function, anything else is a declaration.
            Some(Int) if self.peek_at(2) == Some(LParen) => Ok(Item::Func(self.func_def()?)),
            Some(Int) => Ok(Item::Decl(self.decl()?)),
            _ => {
                let tok = self.advance()?;
                Err(ParseError(format!("expected top-level item, found {tok}")))
            }
        }
    }

    fn func_def(&mut self) -> Result<FuncDef, ParseError> {
        use TokenKind::*;
        let ret = if self.eat(Void) {
            FuncType::Void
        } else {
            self.expect(Int)?;
            FuncType::Int
        };
        let name = self.ident()?;
        self.expect(LParen)?;
        let mut params = Vec::new();
        if self.peek() != Some(RParen) {
            loop {
                params.push(self.param()?);
                if !self.eat(Comma) {
                    break;
                }
            }
        }
        self.expect(RParen)?;
        let body = self.block()?;
        Ok(FuncDef {
            ret,
            name,
            params,
            body,
        })
    }

    fn param(&mut self) -> Result<Param, ParseError> {
        use TokenKind::*;
        self.expect(Int)?;
        let name = self.ident()?;
        let dims = if self.eat(LBracket) {
            // `int a[]` or `int a[][3]...`: the leading dimension is omitted
            // by language convention, only trailing dimensions are recorded.
            self.expect(RBracket)?;
            let mut trailing = Vec::new();
            while self.eat(LBracket) {
                trailing.push(self.expr()?);
                self.expect(RBracket)?;
            }
            Some(trailing)
        } else {
            None
        };
        Ok(Param { name, dims })
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        use TokenKind::*;
        self.expect(LBrace)?;
        let mut items = Vec::new();
        while self.peek() != Some(RBrace) {
            items.push(self.block_item()?);
        }
        self.expect(RBrace)?;
        Ok(Block { items })
    }

    fn block_item(&mut self) -> Result<BlockItem, ParseError> {
        use TokenKind::*;
        match self.peek() {
            Some(Const) | Some(Int) => Ok(BlockItem::Decl(self.decl()?)),
            _ => Ok(BlockItem::Stmt(self.stmt()?)),
        }
    }

    fn decl(&mut self) -> Result<Decl, ParseError> {
        use TokenKind::*;
        if self.eat(Const) {
            self.expect(Int)?;
            let mut defs = Vec::new();
            loop {
                let name = self.ident()?;
                let dims = self.def_dims()?;
                self.expect(Assign)?;
                let init = self.init_val()?;
                defs.push(ConstDef { name, dims, init });
                if !self.eat(Comma) {
                    break;
                }
            }
            self.expect(Semi)?;
            Ok(Decl::Const(ConstDecl { defs }))
        } else {
            self.expect(Int)?;
            let mut defs = Vec::new();
            loop {
                let name = self.ident()?;
                let dims = self.def_dims()?;
                let init = if self.eat(Assign) {
                    Some(self.init_val()?)
                } else {
                    None
                };
                defs.push(VarDef { name, dims, init });
                if !self.eat(Comma) {
                    break;
                }
            }
            self.expect(Semi)?;
            Ok(Decl::Var(VarDecl { defs }))
        }
    }

    fn def_dims(&mut self) -> Result<Vec<Expr>, ParseError> {
        use TokenKind::*;
        let mut dims = Vec::new();
        while self.eat(LBracket) {
            dims.push(self.expr()?);
            self.expect(RBracket)?;
        }
        Ok(dims)
    }

    fn init_val(&mut self) -> Result<InitVal, ParseError> {
        use TokenKind::*;
        if self.eat(LBrace) {
            let mut items = Vec::new();
            if self.peek() != Some(RBrace) {
                loop {
                    items.push(self.init_val()?);
                    if !self.eat(Comma) {
                        break;
                    }
                }
            }
            self.expect(RBrace)?;
            Ok(InitVal::List(items))
        } else {
            Ok(InitVal::Expr(self.expr()?))
        }
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        use TokenKind::*;
        match self.peek() {
            Some(Return) => {
                self.advance()?;
                let val = if self.peek() == Some(Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(Semi)?;
                Ok(Stmt::Return(val))
            }
            Some(If) => {
                self.advance()?;
                self.expect(LParen)?;
                let cond = self.expr()?;
                self.expect(RParen)?;
                let then = Box::new(self.stmt()?);
                let els = if self.eat(Else) {
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                Ok(Stmt::If { cond, then, els })
            }
            Some(While) => {
                self.advance()?;
                self.expect(LParen)?;
                let cond = self.expr()?;
                self.expect(RParen)?;
                let body = Box::new(self.stmt()?);
                Ok(Stmt::While { cond, body })
            }
            Some(Break) => {
                self.advance()?;
                self.expect(Semi)?;
                Ok(Stmt::Break)
            }
            Some(Continue) => {
                self.advance()?;
                self.expect(Semi)?;
                Ok(Stmt::Continue)
            }
            Some(LBrace) => Ok(Stmt::Block(self.block()?)),
            Some(Semi) => {
                self.advance()?;
                Ok(Stmt::Expr(None))
            }
            Some(Id) => {
                // Either `lval = expr;` or an expression statement.  Try the
                // lvalue first and fall back on the saved token index.
                let save = self.pos;
                let lval = self.lval()?;
                if self.eat(Assign) {
                    let rhs = self.expr()?;
                    self.expect(Semi)?;
                    Ok(Stmt::Assign(lval, rhs))
                } else {
                    self.pos = save;
                    let e = self.expr()?;
                    self.expect(Semi)?;
                    Ok(Stmt::Expr(Some(e)))
                }
            }
            _ => {
                let e = self.expr()?;
                self.expect(Semi)?;
                Ok(Stmt::Expr(Some(e)))
            }
        }
    }

    fn lval(&mut self) -> Result<LVal, ParseError> {
        use TokenKind::*;
        let name = self.ident()?;
        let mut idx = Vec::new();
        while self.eat(LBracket) {
            idx.push(self.expr()?);
            self.expect(RBracket)?;
        }
        Ok(LVal { name, idx })
    }

    // Expression levels, lowest precedence first.

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.lor_expr()
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ParseError>,
        ops: &[(TokenKind, BinOp)],
    ) -> Result<Expr, ParseError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (kind, op) in ops {
                if self.eat(*kind) {
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn lor_expr(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::land_expr, &[(TokenKind::OrOr, BinOp::Or)])
    }

    fn land_expr(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(Self::eq_expr, &[(TokenKind::AndAnd, BinOp::And)])
    }

    fn eq_expr(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            Self::rel_expr,
            &[(TokenKind::EqEq, BinOp::Eq), (TokenKind::Ne, BinOp::Ne)],
        )
    }

    fn rel_expr(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            Self::add_expr,
            &[
                (TokenKind::Le, BinOp::Le),
                (TokenKind::Ge, BinOp::Ge),
                (TokenKind::Lt, BinOp::Lt),
                (TokenKind::Gt, BinOp::Gt),
            ],
        )
    }

    fn add_expr(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            Self::mul_expr,
            &[
                (TokenKind::Plus, BinOp::Add),
                (TokenKind::Minus, BinOp::Sub),
            ],
        )
    }

    fn mul_expr(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            Self::unary_expr,
            &[
                (TokenKind::Mul, BinOp::Mul),
                (TokenKind::Div, BinOp::Div),
                (TokenKind::Mod, BinOp::Mod),
            ],
        )
    }

    fn unary_expr(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        let op = match self.peek() {
            Some(Plus) => Some(UnaryOp::Pos),
            Some(Minus) => Some(UnaryOp::Neg),
            Some(Not) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance()?;
            let inner = self.unary_expr()?;
            Ok(Expr::Unary(op, Box::new(inner)))
        } else {
            self.primary_expr()
        }
    }

    fn primary_expr(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        match self.peek() {
            Some(LParen) => {
                self.advance()?;
                let e = self.expr()?;
                self.expect(RParen)?;
                Ok(e)
            }
            Some(Num) => {
                let tok = self.advance()?;
                Ok(Expr::Num(parse_int(tok.text)))
            }
            Some(Id) if self.peek_at(1) == Some(LParen) => {
                let callee = self.ident()?;
                self.expect(LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(RParen) {
                    loop {
                        args.push(self.expr()?);
                        if !self.eat(Comma) {
                            break;
                        }
                    }
                }
                self.expect(RParen)?;
                Ok(Expr::Call { callee, args })
            }
            Some(Id) => Ok(Expr::LVal(self.lval()?)),
            _ => {
                let tok = self.advance()?;
                Err(ParseError(format!("expected expression, found {tok}")))
            }
        }
    }
}

/// Parse a numeric literal.  Decimal, `0x` hex and leading-zero octal, with
/// two's-complement wrap-around on overflow.
fn parse_int(text: &str) -> i32 {
    let (digits, radix) = if let Some(hex) = text.strip_prefix("0x").or(text.strip_prefix("0X")) {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };
    // The lexer guarantees well-formed digits; wrap via u32 like the target.
    u32::from_str_radix(digits, radix).map_or(0, |v| v as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_main() {
        let unit = parse("int main() { return 0; }").unwrap();
        assert_eq!(unit.items.len(), 1);
        let Item::Func(f) = &unit.items[0] else {
            panic!("expected a function")
        };
        assert_eq!(f.name.as_str(), "main");
        assert_eq!(f.ret, FuncType::Int);
        assert!(f.params.is_empty());
        assert_eq!(f.body.items.len(), 1);
    }

    #[test]
    fn precedence_chains_mul_under_add() {
        let unit = parse("int main() { return 1 + 2 * 3; }").unwrap();
        let Item::Func(f) = &unit.items[0] else {
            panic!()
        };
        let BlockItem::Stmt(Stmt::Return(Some(Expr::Binary { op, lhs, rhs }))) = &f.body.items[0]
        else {
            panic!("expected return of a binary expression")
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**lhs, Expr::Num(1)));
        assert!(matches!(
            **rhs,
            Expr::Binary {
                op: BinOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn assignment_vs_expression_statement() {
        let unit = parse("int main() { int a = 0; a[0] = 1; a == 2; return a; }").unwrap();
        let Item::Func(f) = &unit.items[0] else {
            panic!()
        };
        assert!(matches!(
            f.body.items[1],
            BlockItem::Stmt(Stmt::Assign(..))
        ));
        assert!(matches!(
            f.body.items[2],
            BlockItem::Stmt(Stmt::Expr(Some(_)))
        ));
    }

    #[test]
    fn pointer_parameters_drop_leading_dimension() {
        let unit = parse("int f(int a[], int b[][3]) { return a[0] + b[1][2]; }").unwrap();
        let Item::Func(f) = &unit.items[0] else {
            panic!()
        };
        assert_eq!(f.params[0].dims.as_deref().map(<[Expr]>::len), Some(0));
        assert_eq!(f.params[1].dims.as_deref().map(<[Expr]>::len), Some(1));
    }

    #[test]
    fn nested_initializers() {
        let unit = parse("int a[2][3] = {1, 2, 3, {4}};").unwrap();
        let Item::Decl(Decl::Var(decl)) = &unit.items[0] else {
            panic!()
        };
        let def = &decl.defs[0];
        assert_eq!(def.dims.len(), 2);
        let Some(InitVal::List(items)) = &def.init else {
            panic!()
        };
        assert_eq!(items.len(), 4);
        assert!(matches!(items[3], InitVal::List(_)));
    }

    #[test]
    fn dangling_else_binds_to_inner_if() {
        let unit =
            parse("int main() { if (1) if (2) return 1; else return 2; return 0; }").unwrap();
        let Item::Func(f) = &unit.items[0] else {
            panic!()
        };
        let BlockItem::Stmt(Stmt::If { els, then, .. }) = &f.body.items[0] else {
            panic!()
        };
        assert!(els.is_none());
        assert!(matches!(**then, Stmt::If { els: Some(_), .. }));
    }

    #[test]
    fn integer_literal_radixes() {
        assert_eq!(parse_int("42"), 42);
        assert_eq!(parse_int("0"), 0);
        assert_eq!(parse_int("0x1F"), 31);
        assert_eq!(parse_int("017"), 15);
        assert_eq!(parse_int("2147483648"), i32::MIN);
    }
}
