//! Recursive-descent formula parser.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr     := term (('+' | '-') term)*
//! term     := unary (('*' | '/') unary | power)*     // juxtaposition multiplies
//! unary    := ('-' | '+') unary | power
//! power    := postfix ('^' unary)?                   // right-associative
//! postfix  := primary '!'*
//! primary  := number | ident | ident '(' expr ')' | '(' expr ')'
//! ```
//!
//! So `-x^2` is `-(x^2)`, `2^3^2` is `2^(3^2)` and `2x sin(x)` is
//! `2 * x * sin(x)`.

use std::collections::BTreeSet;

use tracing::debug;

use super::lexer::{Spanned, Tok, tokenize};
use super::{CompiledExpression, Constant, ExprBuilder, Function, NodeId};
use crate::error::ParseError;

/// How bare identifiers are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolPolicy {
    /// Any identifier that is not a function or constant becomes a free symbol.
    Open,
    /// Only the listed identifiers (plus the independent variable) are symbols.
    Declared(BTreeSet<String>),
}

/// Parser configuration.
///
/// The default treats `x` as the independent variable and accepts any other
/// identifier as a parameter, which is what model formulas need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiler {
    independent: Option<String>,
    policy: SymbolPolicy,
}

impl Default for Compiler {
    fn default() -> Self {
        Self {
            independent: Some("x".to_string()),
            policy: SymbolPolicy::Open,
        }
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the independent variable, or `None` for plain formulas.
    pub fn independent(mut self, name: Option<&str>) -> Self {
        self.independent = name.map(str::to_string);
        self
    }

    /// Restrict symbols to a declared set.
    pub fn declared<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy = SymbolPolicy::Declared(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn compile(&self, text: &str) -> Result<CompiledExpression, ParseError> {
        let (body, offset) = strip_lhs(text)?;
        let tokens = tokenize(body, offset)?;
        if tokens.is_empty() {
            return Err(ParseError::Empty);
        }
        check_parentheses(&tokens)?;

        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            builder: ExprBuilder::new(),
            compiler: self,
        };
        let root = parser.expression()?;
        if let Some(extra) = parser.tokens.get(parser.pos) {
            return Err(ParseError::UnexpectedToken {
                token: extra.tok.describe(),
                position: extra.position,
            });
        }

        let expr = parser.builder.finish(root, self.independent.as_deref());
        debug!(formula = text, nodes = expr.arena_len(), symbols = ?expr.symbols(), "compiled formula");
        Ok(expr)
    }

    fn is_symbol(&self, name: &str) -> bool {
        if self.independent.as_deref() == Some(name) {
            return true;
        }
        match &self.policy {
            SymbolPolicy::Open => false,
            SymbolPolicy::Declared(names) => names.contains(name),
        }
    }
}

/// Compile a model formula with the default settings.
pub fn compile(text: &str) -> Result<CompiledExpression, ParseError> {
    Compiler::new().compile(text)
}

/// Drop a leading `y =` / `f(x) =`. Returns the body and its byte offset.
fn strip_lhs(text: &str) -> Result<(&str, usize), ParseError> {
    let Some(eq) = text.find('=') else {
        return Ok((text, 0));
    };
    if text[..eq].trim().is_empty() {
        return Err(ParseError::UnexpectedCharacter { ch: '=', position: eq });
    }
    let rest = &text[eq + 1..];
    if let Some(second) = rest.find('=') {
        return Err(ParseError::UnexpectedCharacter {
            ch: '=',
            position: eq + 1 + second,
        });
    }
    Ok((rest, eq + 1))
}

fn check_parentheses(tokens: &[Spanned]) -> Result<(), ParseError> {
    let mut open = Vec::new();
    for t in tokens {
        match t.tok {
            Tok::LPar => open.push(t.position),
            Tok::RPar => {
                if open.pop().is_none() {
                    return Err(ParseError::UnbalancedParentheses { position: t.position });
                }
            }
            _ => {}
        }
    }
    match open.pop() {
        Some(position) => Err(ParseError::UnbalancedParentheses { position }),
        None => Ok(()),
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    builder: ExprBuilder,
    compiler: &'a Compiler,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn advance(&mut self) -> Result<&Spanned, ParseError> {
        let t = self.tokens.get(self.pos).ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(t)
    }

    fn expect_rpar(&mut self) -> Result<(), ParseError> {
        let t = self.advance()?;
        if t.tok == Tok::RPar {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                token: t.tok.describe(),
                position: t.position,
            })
        }
    }

    fn expression(&mut self) -> Result<NodeId, ParseError> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some(Tok::Plus) => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    lhs = self.builder.add(lhs, rhs);
                }
                Some(Tok::Minus) => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    lhs = self.builder.sub(lhs, rhs);
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<NodeId, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            match self.peek() {
                Some(Tok::Star) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    lhs = self.builder.mul(lhs, rhs);
                }
                Some(Tok::Slash) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    lhs = self.builder.div(lhs, rhs);
                }
                Some(Tok::Num(_) | Tok::Ident(_) | Tok::LPar) => {
                    let rhs = self.power()?;
                    lhs = self.builder.mul(lhs, rhs);
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<NodeId, ParseError> {
        match self.peek() {
            Some(Tok::Minus) => {
                self.pos += 1;
                let operand = self.unary()?;
                Ok(self.builder.neg(operand))
            }
            Some(Tok::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<NodeId, ParseError> {
        let base = self.postfix()?;
        if self.peek() == Some(&Tok::Caret) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(self.builder.pow(base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<NodeId, ParseError> {
        let mut node = self.primary()?;
        while self.peek() == Some(&Tok::Bang) {
            self.pos += 1;
            node = self.builder.call(Function::Factorial, node);
        }
        Ok(node)
    }

    fn primary(&mut self) -> Result<NodeId, ParseError> {
        let t = self.advance()?.clone();
        match t.tok {
            Tok::Num(v) => Ok(self.builder.constant(v)),
            Tok::LPar => {
                let inner = self.expression()?;
                self.expect_rpar()?;
                Ok(inner)
            }
            Tok::Ident(name) => self.identifier(&name, t.position),
            other => Err(ParseError::UnexpectedToken {
                token: other.describe(),
                position: t.position,
            }),
        }
    }

    fn identifier(&mut self, name: &str, position: usize) -> Result<NodeId, ParseError> {
        let called = self.peek() == Some(&Tok::LPar);

        // Known symbols win so `x(x + 1)` multiplies and a declared `gamma`
        // stays a variable.
        if self.compiler.is_symbol(name) {
            return Ok(self.builder.symbol(name));
        }

        if let Some(f) = Function::from_name(name) {
            if !called {
                return Err(ParseError::MissingArgument {
                    name: name.to_string(),
                    position,
                });
            }
            self.pos += 1;
            let arg = self.expression()?;
            self.expect_rpar()?;
            return Ok(self.builder.call(f, arg));
        }

        if called {
            return Err(ParseError::UnknownFunction {
                name: name.to_string(),
                position,
            });
        }

        if let Some(c) = Constant::from_name(name) {
            return Ok(self.builder.named(c));
        }

        match self.compiler.policy {
            SymbolPolicy::Open => Ok(self.builder.symbol(name)),
            SymbolPolicy::Declared(_) => Err(ParseError::UnknownIdentifier {
                name: name.to_string(),
                position,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::display::render;

    fn infix(text: &str) -> String {
        let expr = compile(text).unwrap();
        render(&expr, expr.root())
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(infix("-x^2"), "-x^2");
        assert_eq!(infix("(-x)^2"), "(-x)^2");
        assert_eq!(infix("2^3^x"), "2^3^x");
        assert_eq!(infix("a - (b - c)"), "a - (b - c)");
        assert_eq!(infix("a / (b * c)"), "a / (b * c)");
    }

    #[test]
    fn implicit_multiplication() {
        assert_eq!(infix("2x"), "2 * x");
        assert_eq!(infix("2sin(x)"), "2 * sin(x)");
        assert_eq!(infix("(x+1)(x-1)"), "(x + 1) * (x - 1)");
        assert_eq!(infix("x(x+1)"), "x * (x + 1)");
    }

    #[test]
    fn strips_left_hand_side_and_aliases() {
        let expr = compile("y = a sen(x) + b ln(x)").unwrap();
        assert_eq!(expr.parameters(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(render(&expr, expr.root()), "a * sin(x) + b * ln(x)");
    }

    #[test]
    fn parameters_exclude_independent_and_constants() {
        let expr = compile("a*exp(-((x-b)/c)^2) + pi*e").unwrap();
        assert_eq!(
            expr.parameters(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn postfix_factorial() {
        assert_eq!(infix("n!"), "factorial(n)");
        assert_eq!(infix("2x!"), "2 * factorial(x)");
    }

    #[test]
    fn error_cases() {
        assert_eq!(compile("   ").unwrap_err(), ParseError::Empty);
        assert_eq!(
            compile("(x + 1").unwrap_err(),
            ParseError::UnbalancedParentheses { position: 0 }
        );
        assert_eq!(
            compile("x + 1)").unwrap_err(),
            ParseError::UnbalancedParentheses { position: 5 }
        );
        assert_eq!(
            compile("foo(x)").unwrap_err(),
            ParseError::UnknownFunction {
                name: "foo".to_string(),
                position: 0
            }
        );
        assert_eq!(
            compile("sin + x").unwrap_err(),
            ParseError::MissingArgument {
                name: "sin".to_string(),
                position: 0
            }
        );
        assert_eq!(compile("x +").unwrap_err(), ParseError::UnexpectedEnd);
    }

    #[test]
    fn declared_policy_rejects_unknown_identifiers() {
        let compiler = Compiler::new().independent(None).declared(["m", "v"]);
        let expr = compiler.compile("m*v^2/2").unwrap();
        assert_eq!(expr.symbols(), &["m".to_string(), "v".to_string()]);

        let err = compiler.compile("m*g").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownIdentifier {
                name: "g".to_string(),
                position: 2
            }
        );
    }

    #[test]
    fn error_positions_account_for_stripped_prefix() {
        let err = compile("y = 2 $ x").unwrap_err();
        assert_eq!(err, ParseError::UnexpectedCharacter { ch: '$', position: 6 });
    }
}
