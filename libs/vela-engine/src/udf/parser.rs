//! Recursive-descent parser for the lambda subset accepted as UDF text.
//!
//! ```text
//! lambda     := 'lambda' [IDENT (',' IDENT)* [',']] ':' expr
//! expr       := or_expr ['if' or_expr 'else' expr]
//! or_expr    := and_expr ('or' and_expr)*
//! and_expr   := not_expr ('and' not_expr)*
//! not_expr   := 'not' not_expr | comparison
//! comparison := arith (CMP arith)*
//! arith      := term (('+' | '-') term)*
//! term       := factor (('*' | '/' | '//' | '%') factor)*
//! factor     := ('-' | '+') factor | power
//! power      := postfix ['**' factor]
//! postfix    := atom ('(' args ')' | '[' expr ']' | '.' IDENT)*
//! ```

use vela_api::Value;

use super::UdfError;
use super::ir::{BinaryOp, Builtin, CmpOp, Expr, UnaryOp, math_constant};
use super::lexer::{Span, Token, TokenKind, parse_err, tokenize};

/// Parse lambda source into its parameter names and body.
pub(crate) fn parse_lambda(input: &str) -> Result<(Vec<String>, Expr), UdfError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(input, &tokens);
    parser.expect(TokenKind::Lambda)?;

    let mut params = Vec::new();
    while !parser.check(&TokenKind::Colon) {
        let (name, span) = parser.ident()?;
        if params.contains(&name) {
            return Err(parse_err(input, span, format!("duplicate parameter '{name}'")));
        }
        params.push(name);
        if !parser.eat(&TokenKind::Comma) {
            break;
        }
    }
    parser.expect(TokenKind::Colon)?;
    parser.params = params;

    let body = parser.expr()?;
    if let Some(t) = parser.peek() {
        return Err(parse_err(
            input,
            t.span,
            format!("unexpected token after expression: {:?}", t.kind),
        ));
    }
    Ok((parser.params, body))
}

struct Parser<'a> {
    input: &'a str,
    tokens: &'a [Token],
    pos: usize,
    params: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, tokens: &'a [Token]) -> Self {
        Self {
            input,
            tokens,
            pos: 0,
            params: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|t| &t.kind == kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn end_span(&self) -> Span {
        Span {
            start: self.input.len(),
            end: self.input.len(),
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<(), UdfError> {
        match self.advance() {
            Some(t) if t.kind == expected => Ok(()),
            Some(t) => Err(parse_err(
                self.input,
                t.span,
                format!("expected {expected:?}, got {:?}", t.kind),
            )),
            None => Err(parse_err(
                self.input,
                self.end_span(),
                format!("expected {expected:?}, got end of input"),
            )),
        }
    }

    fn ident(&mut self) -> Result<(String, Span), UdfError> {
        match self.advance() {
            Some(Token {
                kind: TokenKind::Ident(name),
                span,
            }) => Ok((name, span)),
            Some(t) => Err(parse_err(
                self.input,
                t.span,
                format!("expected identifier, got {:?}", t.kind),
            )),
            None => Err(parse_err(
                self.input,
                self.end_span(),
                "expected identifier, got end of input",
            )),
        }
    }

    // ---- Grammar rules ----

    fn expr(&mut self) -> Result<Expr, UdfError> {
        let then = self.or_expr()?;
        if !self.eat(&TokenKind::If) {
            return Ok(then);
        }
        let cond = self.or_expr()?;
        self.expect(TokenKind::Else)?;
        let otherwise = self.expr()?;
        Ok(Expr::IfElse {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn or_expr(&mut self) -> Result<Expr, UdfError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&TokenKind::Or) {
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, UdfError> {
        let mut lhs = self.not_expr()?;
        while self.eat(&TokenKind::And) {
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, UdfError> {
        if self.eat(&TokenKind::Not) {
            let inner = self.not_expr()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, UdfError> {
        let first = self.arith()?;
        let mut links = Vec::new();
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::EqEq) => CmpOp::Eq,
                Some(TokenKind::Ne) => CmpOp::Ne,
                Some(TokenKind::Lt) => CmpOp::Lt,
                Some(TokenKind::Le) => CmpOp::Le,
                Some(TokenKind::Gt) => CmpOp::Gt,
                Some(TokenKind::Ge) => CmpOp::Ge,
                _ => break,
            };
            self.pos += 1;
            links.push((op, self.arith()?));
        }
        if links.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), links))
        }
    }

    fn arith(&mut self) -> Result<Expr, UdfError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, UdfError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                Some(TokenKind::SlashSlash) => BinaryOp::FloorDiv,
                Some(TokenKind::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, UdfError> {
        if self.eat(&TokenKind::Minus) {
            let inner = self.factor()?;
            // Fold negative literals so `2 ** -1` keeps a constant exponent.
            return Ok(match inner {
                Expr::Const(Value::Int(i)) if i != i64::MIN => Expr::Const(Value::Int(-i)),
                Expr::Const(Value::Float(f)) => Expr::Const(Value::Float(-f)),
                other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
            });
        }
        if self.eat(&TokenKind::Plus) {
            let inner = self.factor()?;
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(inner)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, UdfError> {
        let base = self.postfix()?;
        if self.eat(&TokenKind::StarStar) {
            let exp = self.factor()?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, UdfError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat(&TokenKind::LBracket) {
                let idx = self.expr()?;
                self.expect(TokenKind::RBracket)?;
                expr = match idx {
                    Expr::Const(Value::Str(name)) => Expr::Field(Box::new(expr), name),
                    idx => Expr::Index(Box::new(expr), Box::new(idx)),
                };
                continue;
            }
            if let Some(t) = self.peek().filter(|t| {
                matches!(t.kind, TokenKind::LParen | TokenKind::Dot)
            }) {
                return Err(parse_err(self.input, t.span, "only named functions can be called"));
            }
            return Ok(expr);
        }
    }

    fn atom(&mut self) -> Result<Expr, UdfError> {
        let Some(tok) = self.advance() else {
            return Err(parse_err(
                self.input,
                self.end_span(),
                "unexpected end of input",
            ));
        };
        match tok.kind {
            TokenKind::Int(i) => Ok(Expr::Const(Value::Int(i))),
            TokenKind::Float(f) => Ok(Expr::Const(Value::Float(f))),
            TokenKind::Str(s) => Ok(Expr::Const(Value::Str(s))),
            TokenKind::True => Ok(Expr::Const(Value::Bool(true))),
            TokenKind::False => Ok(Expr::Const(Value::Bool(false))),
            TokenKind::LParen => self.parenthesized(),
            TokenKind::Ident(name) => self.name(name, tok.span),
            other => Err(parse_err(
                self.input,
                tok.span,
                format!("unexpected token {other:?}"),
            )),
        }
    }

    /// `( )`, `(e)`, `(e,)`, `(a, b, ...)`.
    fn parenthesized(&mut self) -> Result<Expr, UdfError> {
        if self.eat(&TokenKind::RParen) {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.expr()?;
        if self.eat(&TokenKind::RParen) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RParen) {
                break;
            }
            items.push(self.expr()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(Expr::Tuple(items))
    }

    /// Parameters shadow everything; then `math.<attr>`, builtin calls, bare constants.
    fn name(&mut self, name: String, span: Span) -> Result<Expr, UdfError> {
        if let Some(i) = self.params.iter().position(|p| *p == name) {
            return Ok(Expr::Param(i));
        }

        if name == "math" && self.eat(&TokenKind::Dot) {
            let (attr, attr_span) = self.ident()?;
            if self.check(&TokenKind::LParen) {
                let Some(f) = Builtin::math(&attr) else {
                    return Err(parse_err(
                        self.input,
                        attr_span,
                        format!("unknown function 'math.{attr}'"),
                    ));
                };
                return self.call(f, attr_span);
            }
            return math_constant(&attr)
                .map(|c| Expr::Const(Value::Float(c)))
                .ok_or_else(|| {
                    parse_err(self.input, attr_span, format!("unknown name 'math.{attr}'"))
                });
        }

        if self.check(&TokenKind::LParen) {
            let Some(f) = Builtin::global(&name) else {
                return Err(parse_err(
                    self.input,
                    span,
                    format!("unknown function '{name}'"),
                ));
            };
            return self.call(f, span);
        }

        math_constant(&name)
            .map(|c| Expr::Const(Value::Float(c)))
            .ok_or_else(|| parse_err(self.input, span, format!("unknown name '{name}'")))
    }

    fn call(&mut self, f: Builtin, span: Span) -> Result<Expr, UdfError> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            args.push(self.expr()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        if !f.accepts_args(args.len()) {
            return Err(parse_err(
                self.input,
                span,
                format!("{}() does not take {} argument(s)", f.name(), args.len()),
            ));
        }
        Ok(Expr::Call(f, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udf::ir::{binary, call, compare, if_else, index, lit, param};

    fn body(src: &str) -> Expr {
        parse_lambda(src).unwrap().1
    }

    #[test]
    fn math_calls_and_params() {
        let (params, e) = parse_lambda("lambda x, y: math.pow(x, y)").unwrap();
        assert_eq!(params, vec!["x", "y"]);
        assert_eq!(e, call(Builtin::Pow, [param(0), param(1)]));
        assert_eq!(body("lambda t: math.atan2(t[0], t[1])"), call(Builtin::Atan2, [
            index(param(0), 0),
            index(param(0), 1),
        ]));
    }

    #[test]
    fn precedence() {
        assert_eq!(
            body("lambda x: -x ** 2"),
            Expr::Unary(
                UnaryOp::Neg,
                Box::new(binary(BinaryOp::Pow, param(0), lit(2)))
            )
        );
        assert_eq!(body("lambda x: 2 ** -1"), binary(BinaryOp::Pow, lit(2), lit(-1)));
        assert_eq!(
            body("lambda x: 1 + x * 2"),
            binary(BinaryOp::Add, lit(1), binary(BinaryOp::Mul, param(0), lit(2)))
        );
    }

    #[test]
    fn conditional_and_chains() {
        assert_eq!(
            body("lambda x: x if x > 0 else 0"),
            if_else(compare(param(0), CmpOp::Gt, lit(0)), param(0), lit(0))
        );
        let chain = body("lambda x: 0 <= x < 10");
        assert!(matches!(chain, Expr::Compare(_, ref links) if links.len() == 2));
    }

    #[test]
    fn constants_and_tuples() {
        assert_eq!(body("lambda: math.pi"), lit(std::f64::consts::PI));
        assert_eq!(body("lambda x: (x,)"), Expr::Tuple(vec![param(0)]));
        assert_eq!(body("lambda x: (x)"), param(0));
        assert_eq!(
            body("lambda row: row['a']"),
            Expr::Field(Box::new(param(0)), "a".into())
        );
    }

    #[test]
    fn params_shadow_builtins() {
        assert_eq!(body("lambda e: e"), param(0));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_lambda("x: x").is_err());
        assert!(parse_lambda("lambda x: y").is_err());
        assert!(parse_lambda("lambda x: math.sin(x, x)").is_err());
        assert!(parse_lambda("lambda x: math.nope(x)").is_err());
        assert!(parse_lambda("lambda x, x: x").is_err());
        assert!(parse_lambda("lambda x: x x").is_err());
        assert!(parse_lambda("lambda x: x(1)").is_err());
    }
}
