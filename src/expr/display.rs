//! Infix rendering.
//!
//! The output re-parses to an equivalent expression: parentheses are inserted
//! wherever precedence or associativity would otherwise change the tree.

use std::fmt;

use super::{BinaryOp, CompiledExpression, Node, NodeId, UnaryOp};

const PREC_ADD: u8 = 1;
const PREC_MUL: u8 = 2;
const PREC_NEG: u8 = 3;
const PREC_POW: u8 = 4;
const PREC_ATOM: u8 = 5;

pub(crate) fn precedence(expr: &CompiledExpression, id: NodeId) -> u8 {
    match expr.node(id) {
        Node::Binary(BinaryOp::Add | BinaryOp::Sub, ..) => PREC_ADD,
        Node::Binary(BinaryOp::Mul | BinaryOp::Div, ..) => PREC_MUL,
        Node::Unary(UnaryOp::Neg, _) => PREC_NEG,
        Node::Const(v) if *v < 0.0 => PREC_NEG,
        Node::Binary(BinaryOp::Pow, ..) => PREC_POW,
        _ => PREC_ATOM,
    }
}

/// Shortest text that parses back to the same `f64`.
pub fn format_number(v: f64) -> String {
    let a = v.abs();
    if a != 0.0 && !(1e-4..1e15).contains(&a) {
        format!("{v:e}")
    } else {
        format!("{v}")
    }
}

/// Render the sub-expression rooted at `id`.
pub fn render(expr: &CompiledExpression, id: NodeId) -> String {
    let mut out = String::new();
    write_node(expr, id, &mut out);
    out
}

fn write_child(expr: &CompiledExpression, id: NodeId, min_prec: u8, out: &mut String) {
    if precedence(expr, id) < min_prec {
        out.push('(');
        write_node(expr, id, out);
        out.push(')');
    } else {
        write_node(expr, id, out);
    }
}

fn write_node(expr: &CompiledExpression, id: NodeId, out: &mut String) {
    match expr.node(id) {
        Node::Const(v) => out.push_str(&format_number(*v)),
        Node::Named(c) => out.push_str(c.name()),
        Node::Symbol(name) => out.push_str(name),
        Node::Unary(UnaryOp::Neg, a) => {
            out.push('-');
            write_child(expr, *a, PREC_NEG, out);
        }
        Node::Binary(op, a, b) => {
            let (left_min, right_min) = match op {
                BinaryOp::Add | BinaryOp::Sub => (PREC_ADD, PREC_MUL),
                BinaryOp::Mul | BinaryOp::Div => (PREC_MUL, PREC_NEG),
                BinaryOp::Pow => (PREC_ATOM, PREC_POW),
            };
            write_child(expr, *a, left_min, out);
            if *op == BinaryOp::Pow {
                out.push('^');
            } else {
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
            }
            write_child(expr, *b, right_min, out);
        }
        Node::Call(f, a) => {
            out.push_str(f.name());
            out.push('(');
            write_node(expr, *a, out);
            out.push(')');
        }
    }
}

impl fmt::Display for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self, self.root()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile;

    #[test]
    fn number_formatting_round_trips() {
        for v in [0.1, 2.0, -3.5, 1e-10, 6.02e23, 123456.789] {
            let text = format_number(v);
            assert_eq!(text.parse::<f64>().unwrap(), v, "{text}");
        }
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(1e-10), "1e-10");
    }

    #[test]
    fn negative_exponents_are_parenthesized() {
        let expr = compile("x^(-1)").unwrap();
        assert_eq!(expr.to_string(), "x^(-1)");
    }

    #[test]
    fn adding_negative_constant_becomes_subtraction() {
        let expr = compile("x + (-2)").unwrap();
        assert_eq!(expr.to_string(), "x - 2");
    }
}
