//! Formula tokenizer.
//!
//! Supports:
//! - decimal numbers with optional exponent (`1.5e-3`, `.5`)
//! - identifiers (`[A-Za-z_α-ω][A-Za-z0-9_]*`)
//! - operators `+ - * / ^ **` and postfix `!`
//! - parentheses
//! - a few Unicode spellings: `π`, `×`, `·`, `−`, `²`, `³`
//!
//! Positions are byte offsets into the input string.

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Bang,
    LPar,
    RPar,
}

impl Tok {
    /// Source-like spelling for error messages.
    pub fn describe(&self) -> String {
        match self {
            Tok::Num(v) => v.to_string(),
            Tok::Ident(name) => name.clone(),
            Tok::Plus => "+".to_string(),
            Tok::Minus => "-".to_string(),
            Tok::Star => "*".to_string(),
            Tok::Slash => "/".to_string(),
            Tok::Caret => "^".to_string(),
            Tok::Bang => "!".to_string(),
            Tok::LPar => "(".to_string(),
            Tok::RPar => ")".to_string(),
        }
    }
}

/// A token with the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub tok: Tok,
    pub position: usize,
}

/// Tokenize formula text. `offset` is added to every reported position.
pub fn tokenize(text: &str, offset: usize) -> Result<Vec<Spanned>, ParseError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let position = pos + offset;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit())) {
            let end = scan_number(&chars, i);
            let end_byte = chars.get(end).map_or(text.len(), |(p, _)| *p);
            let literal = &text[pos..end_byte];
            let value: f64 = literal.parse().map_err(|_| ParseError::InvalidNumber {
                text: literal.to_string(),
                position,
            })?;
            out.push(Spanned {
                tok: Tok::Num(value),
                position,
            });
            i = end;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            if c == 'π' {
                out.push(Spanned {
                    tok: Tok::Ident("pi".to_string()),
                    position,
                });
                i += 1;
                continue;
            }
            let mut end = i + 1;
            while end < chars.len() && is_ident_continue(chars[end].1) {
                end += 1;
            }
            let end_byte = chars.get(end).map_or(text.len(), |(p, _)| *p);
            out.push(Spanned {
                tok: Tok::Ident(text[pos..end_byte].to_string()),
                position,
            });
            i = end;
            continue;
        }

        let tok = match c {
            '+' => Tok::Plus,
            '-' | '−' => Tok::Minus,
            '*' | '×' | '·' => {
                // `**` is exponentiation.
                if c == '*' && chars.get(i + 1).is_some_and(|(_, n)| *n == '*') {
                    out.push(Spanned {
                        tok: Tok::Caret,
                        position,
                    });
                    i += 2;
                    continue;
                }
                Tok::Star
            }
            '/' | '÷' => Tok::Slash,
            '^' => Tok::Caret,
            '!' => Tok::Bang,
            '(' | '[' => Tok::LPar,
            ')' | ']' => Tok::RPar,
            '²' | '³' => {
                out.push(Spanned {
                    tok: Tok::Caret,
                    position,
                });
                out.push(Spanned {
                    tok: Tok::Num(if c == '²' { 2.0 } else { 3.0 }),
                    position,
                });
                i += 1;
                continue;
            }
            other => {
                return Err(ParseError::UnexpectedCharacter { ch: other, position });
            }
        };
        out.push(Spanned { tok, position });
        i += 1;
    }

    Ok(out)
}

fn is_ident_continue(c: char) -> bool {
    (c.is_alphabetic() && c != 'π') || c.is_ascii_digit() || c == '_'
}

/// Index one past the end of the number literal starting at `start`.
///
/// Digits and dots are consumed greedily so `1.2.3` fails as one literal. An
/// `e`/`E` only belongs to the literal when digits follow it (optionally
/// signed); otherwise `2e` lexes as `2` followed by the identifier `e`.
fn scan_number(chars: &[(usize, char)], start: usize) -> usize {
    let digit_at = |k: usize| chars.get(k).is_some_and(|(_, c)| c.is_ascii_digit());
    let mut i = start;
    while chars.get(i).is_some_and(|(_, c)| c.is_ascii_digit() || *c == '.') {
        i += 1;
    }
    if chars.get(i).is_some_and(|(_, c)| *c == 'e' || *c == 'E') {
        let mut j = i + 1;
        if chars.get(j).is_some_and(|(_, c)| *c == '+' || *c == '-') {
            j += 1;
        }
        if digit_at(j) {
            while digit_at(j) {
                j += 1;
            }
            i = j;
        }
    }
    i
}
