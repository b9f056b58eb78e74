use crate::CompileError;
use bumpalo::{Bump, collections::Vec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug)]
pub enum Expr<'a> {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
    Ident(&'a str),
    Unary(UnaryOp, &'a Expr<'a>),
    Binary(BinaryOp, &'a Expr<'a>, &'a Expr<'a>),
    Ternary(&'a Expr<'a>, &'a Expr<'a>, &'a Expr<'a>),
    Call(&'a str, &'a [&'a Expr<'a>]),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token<'a> {
    Int(i64),
    Uint(u32),
    Float(f32),
    Ident(&'a str),
    Punct(&'static str),
    End,
}

// longest first
const PUNCTUATION: &[&str] = &[
    "&&", "||", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "<", ">", "!", "?", ":", "(", ")", ",",
];

/// Deepest nesting of parentheses, calls, ternaries and unary operators.
pub const MAX_NESTING: usize = 128;

/// Recursive descent parser producing an arena allocated tree.
pub struct Parser<'a> {
    arena: &'a Bump,
    source: &'a str,
    pos: usize,
    token: Token<'a>,
    token_pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn parse(arena: &'a Bump, source: &'a str) -> Result<&'a Expr<'a>, CompileError> {
        let mut parser = Parser {
            arena,
            source,
            pos: 0,
            token: Token::End,
            token_pos: 0,
            depth: 0,
        };

        parser.advance()?;
        let expr = parser.ternary()?;
        if parser.token != Token::End {
            return Err(parser.error("unexpected trailing input"));
        }

        Ok(expr)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Syntax {
            pos: self.token_pos,
            message: message.into(),
        }
    }

    fn advance(&mut self) -> Result<(), CompileError> {
        let bytes = self.source.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }

        self.token_pos = self.pos;
        let rest = &self.source[self.pos..];
        let Some(first) = rest.chars().next() else {
            self.token = Token::End;
            return Ok(());
        };

        if first.is_ascii_digit() || (first == '.' && rest[1..].starts_with(|c: char| c.is_ascii_digit())) {
            return self.number();
        }

        if first.is_ascii_alphabetic() || first == '_' {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            self.token = Token::Ident(&rest[..len]);
            self.pos += len;
            return Ok(());
        }

        match PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            Some(&punct) => {
                self.token = Token::Punct(punct);
                self.pos += punct.len();
                Ok(())
            }
            None => Err(self.error(format!("unexpected character `{first}`"))),
        }
    }

    fn number(&mut self) -> Result<(), CompileError> {
        let rest = &self.source[self.pos..];
        let bytes = rest.as_bytes();
        let mut len = 0;
        let mut is_float = false;

        while len < bytes.len() && bytes[len].is_ascii_digit() {
            len += 1;
        }
        if len < bytes.len() && bytes[len] == b'.' {
            is_float = true;
            len += 1;
            while len < bytes.len() && bytes[len].is_ascii_digit() {
                len += 1;
            }
        }
        if len < bytes.len() && (bytes[len] == b'e' || bytes[len] == b'E') {
            let mut exp = len + 1;
            if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
                exp += 1;
            }
            if exp < bytes.len() && bytes[exp].is_ascii_digit() {
                is_float = true;
                len = exp;
                while len < bytes.len() && bytes[len].is_ascii_digit() {
                    len += 1;
                }
            }
        }

        let text = &rest[..len];
        let suffix = bytes.get(len).copied();
        self.token = match suffix {
            Some(b'f' | b'F') => {
                len += 1;
                Token::Float(text.parse().map_err(|_| self.error("invalid float literal"))?)
            }
            Some(b'u' | b'U') if !is_float => {
                len += 1;
                Token::Uint(text.parse().map_err(|_| self.error("uint literal out of range"))?)
            }
            _ if is_float => Token::Float(text.parse().map_err(|_| self.error("invalid float literal"))?),
            _ => Token::Int(text.parse().map_err(|_| self.error("integer literal out of range"))?),
        };

        self.pos += len;
        if self.source[self.pos..].starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
            return Err(self.error("invalid numeric literal suffix"));
        }

        Ok(())
    }

    fn eat(&mut self, punct: &str) -> Result<bool, CompileError> {
        if matches!(self.token, Token::Punct(p) if p == punct) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), CompileError> {
        if self.eat(punct)? {
            Ok(())
        } else {
            Err(self.error(format!("expected `{punct}`")))
        }
    }

    fn alloc(&self, expr: Expr<'a>) -> &'a Expr<'a> {
        self.arena.alloc(expr)
    }

    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<&'a Expr<'a>, CompileError>,
    ) -> Result<&'a Expr<'a>, CompileError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("expression nests deeper than {MAX_NESTING} levels")));
        }

        self.depth += 1;
        let expr = parse(self);
        self.depth -= 1;
        expr
    }

    fn ternary(&mut self) -> Result<&'a Expr<'a>, CompileError> {
        let cond = self.binary(0)?;
        if self.eat("?")? {
            let then = self.nested(Self::ternary)?;
            self.expect(":")?;
            let otherwise = self.nested(Self::ternary)?;
            return Ok(self.alloc(Expr::Ternary(cond, then, otherwise)));
        }

        Ok(cond)
    }

    fn binary(&mut self, min_level: usize) -> Result<&'a Expr<'a>, CompileError> {
        // lowest precedence first
        const LEVELS: &[&[(&str, BinaryOp)]] = &[
            &[("||", BinaryOp::Or)],
            &[("&&", BinaryOp::And)],
            &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
            &[
                ("<", BinaryOp::Lt),
                ("<=", BinaryOp::Le),
                (">", BinaryOp::Gt),
                (">=", BinaryOp::Ge),
            ],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Mod)],
        ];

        if min_level == LEVELS.len() {
            return self.unary();
        }

        let mut lhs = self.binary(min_level + 1)?;
        'outer: loop {
            for (punct, op) in LEVELS[min_level] {
                if self.eat(punct)? {
                    let rhs = self.binary(min_level + 1)?;
                    lhs = self.alloc(Expr::Binary(*op, lhs, rhs));
                    continue 'outer;
                }
            }

            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> Result<&'a Expr<'a>, CompileError> {
        if self.eat("-")? {
            let expr = self.nested(Self::unary)?;
            return Ok(self.alloc(Expr::Unary(UnaryOp::Neg, expr)));
        }
        if self.eat("!")? {
            let expr = self.nested(Self::unary)?;
            return Ok(self.alloc(Expr::Unary(UnaryOp::Not, expr)));
        }
        if self.eat("+")? {
            return self.nested(Self::unary);
        }

        self.primary()
    }

    fn primary(&mut self) -> Result<&'a Expr<'a>, CompileError> {
        let expr = match self.token {
            Token::Int(value) => {
                let value = i32::try_from(value).map_err(|_| self.error("integer literal out of range"))?;
                self.advance()?;
                Expr::Int(value)
            }
            Token::Uint(value) => {
                self.advance()?;
                Expr::Uint(value)
            }
            Token::Float(value) => {
                self.advance()?;
                Expr::Float(value)
            }
            Token::Ident(name) => {
                self.advance()?;
                match name {
                    "true" => Expr::Bool(true),
                    "false" => Expr::Bool(false),
                    _ if self.eat("(")? => {
                        let mut args = Vec::new_in(self.arena);
                        if !self.eat(")")? {
                            loop {
                                args.push(self.nested(Self::ternary)?);
                                if self.eat(")")? {
                                    break;
                                }
                                self.expect(",")?;
                            }
                        }
                        Expr::Call(name, args.into_bump_slice())
                    }
                    _ => Expr::Ident(name),
                }
            }
            Token::Punct("(") => {
                self.advance()?;
                let expr = self.nested(Self::ternary)?;
                self.expect(")")?;
                return Ok(expr);
            }
            Token::Punct(p) => return Err(self.error(format!("unexpected `{p}`"))),
            Token::End => return Err(self.error("unexpected end of input")),
        };

        Ok(self.alloc(expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence() {
        let arena = Bump::new();
        let expr = Parser::parse(&arena, "1 + 2 * 3 == 7 && !false").unwrap();
        let Expr::Binary(BinaryOp::And, lhs, rhs) = expr else {
            panic!("expected `&&` at the root, got {expr:?}");
        };
        assert!(matches!(rhs, Expr::Unary(UnaryOp::Not, Expr::Bool(false))));
        let Expr::Binary(BinaryOp::Eq, sum, Expr::Int(7)) = lhs else {
            panic!("expected `==`, got {lhs:?}");
        };
        assert!(matches!(
            sum,
            Expr::Binary(BinaryOp::Add, Expr::Int(1), Expr::Binary(BinaryOp::Mul, Expr::Int(2), Expr::Int(3)))
        ));
    }

    #[test]
    fn literals() {
        let arena = Bump::new();
        assert!(matches!(Parser::parse(&arena, "4u"), Ok(Expr::Uint(4))));
        assert!(matches!(Parser::parse(&arena, "2.5"), Ok(Expr::Float(x)) if *x == 2.5));
        assert!(matches!(Parser::parse(&arena, "1e2f"), Ok(Expr::Float(x)) if *x == 100.0));
        assert!(matches!(Parser::parse(&arena, ".5"), Ok(Expr::Float(x)) if *x == 0.5));
    }

    #[test]
    fn calls_and_ternary() {
        let arena = Bump::new();
        let expr = Parser::parse(&arena, "x > 0 ? max(x, 1.0) : -x").unwrap();
        let Expr::Ternary(_, Expr::Call("max", args), Expr::Unary(UnaryOp::Neg, Expr::Ident("x"))) = expr else {
            panic!("unexpected tree {expr:?}");
        };
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn syntax_errors() {
        let arena = Bump::new();
        assert!(matches!(
            Parser::parse(&arena, "1 +"),
            Err(CompileError::Syntax { pos: 3, .. })
        ));
        assert!(matches!(
            Parser::parse(&arena, "(1"),
            Err(CompileError::Syntax { pos: 2, .. })
        ));
        assert!(matches!(
            Parser::parse(&arena, "3000000000"),
            Err(CompileError::Syntax { pos: 0, .. })
        ));
        assert!(matches!(Parser::parse(&arena, "1 # 2"), Err(CompileError::Syntax { pos: 2, .. })));
    }

    #[test]
    fn nesting_is_limited() {
        let arena = Bump::new();
        let parens = |n: usize| format!("{}1{}", "(".repeat(n), ")".repeat(n));
        assert!(matches!(Parser::parse(&arena, &parens(MAX_NESTING)), Ok(Expr::Int(1))));
        assert!(matches!(Parser::parse(&arena, &parens(100_000)), Err(CompileError::Syntax { .. })));

        let negations = format!("{}1", "-".repeat(100_000));
        assert!(matches!(Parser::parse(&arena, &negations), Err(CompileError::Syntax { .. })));

        let ternaries = format!("{}1", "true ? 1 : ".repeat(100_000));
        assert!(matches!(Parser::parse(&arena, &ternaries), Err(CompileError::Syntax { .. })));
    }
}
