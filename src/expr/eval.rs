//! Numeric evaluation.
//!
//! Evaluation walks the precomputed post-order schedule once, so each shared
//! sub-expression is computed a single time. The first undefined operation
//! stops the walk and is reported as a [`DomainError`] naming the offending
//! sub-expression.

use std::collections::{BTreeMap, HashMap};

use super::display::render;
use super::{BinaryOp, CompiledExpression, Function, Node, NodeId, UnaryOp};
use crate::error::{DomainError, DomainReason};
use crate::math::special;

/// Symbol lookup used during evaluation.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<f64>;
}

impl Scope for HashMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Scope for BTreeMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Scope for [(&str, f64)] {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }
}

impl<const N: usize> Scope for [(&str, f64); N] {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.as_slice().lookup(name)
    }
}

impl<T: Scope + ?Sized> Scope for &T {
    fn lookup(&self, name: &str) -> Option<f64> {
        (**self).lookup(name)
    }
}

/// Evaluate the whole expression.
pub fn evaluate<S: Scope + ?Sized>(expr: &CompiledExpression, scope: &S) -> Result<f64, DomainError> {
    let mut slots = vec![0.0; expr.arena_len()];
    evaluate_into(expr, scope, &mut slots)
}

/// Evaluate reusing a caller-provided slot buffer (resized as needed).
///
/// Hot loops such as Jacobian assembly call this to avoid one allocation per
/// point.
pub fn evaluate_into<S: Scope + ?Sized>(
    expr: &CompiledExpression,
    scope: &S,
    slots: &mut Vec<f64>,
) -> Result<f64, DomainError> {
    if slots.len() < expr.arena_len() {
        slots.resize(expr.arena_len(), 0.0);
    }
    for &id in expr.schedule() {
        let value = eval_node(expr, id, scope, slots).map_err(|reason| DomainError {
            expression: render(expr, id),
            reason,
        })?;
        slots[id.index()] = value;
    }
    Ok(slots[expr.root().index()])
}

fn eval_node<S: Scope + ?Sized>(
    expr: &CompiledExpression,
    id: NodeId,
    scope: &S,
    slots: &[f64],
) -> Result<f64, DomainReason> {
    let v = |n: &NodeId| slots[n.index()];
    let value = match expr.node(id) {
        Node::Const(c) => *c,
        Node::Named(c) => c.value(),
        Node::Symbol(name) => scope.lookup(name).ok_or(DomainReason::UnboundSymbol)?,
        Node::Unary(UnaryOp::Neg, a) => -v(a),
        Node::Binary(op, a, b) => binary(*op, v(a), v(b))?,
        Node::Call(f, a) => apply(*f, v(a))?,
    };
    classify(value)
}

fn classify(value: f64) -> Result<f64, DomainReason> {
    if value.is_nan() {
        Err(DomainReason::NotANumber)
    } else if value.is_infinite() {
        Err(DomainReason::Overflow)
    } else {
        Ok(value)
    }
}

fn is_integer(v: f64) -> bool {
    v.fract() == 0.0
}

fn binary(op: BinaryOp, a: f64, b: f64) -> Result<f64, DomainReason> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(DomainReason::DivisionByZero);
            }
            a / b
        }
        BinaryOp::Pow => {
            if a < 0.0 && !is_integer(b) {
                return Err(DomainReason::NegativeBaseFractionalExponent);
            }
            if a == 0.0 && b < 0.0 {
                return Err(DomainReason::DivisionByZero);
            }
            if is_integer(b) && b.abs() <= i32::MAX as f64 {
                a.powi(b as i32)
            } else {
                a.powf(b)
            }
        }
    })
}

/// Apply a function, classifying arguments outside its domain.
pub(crate) fn apply(f: Function, u: f64) -> Result<f64, DomainReason> {
    let non_positive_integer = u <= 0.0 && is_integer(u);
    Ok(match f {
        Function::Sin => u.sin(),
        Function::Cos => u.cos(),
        Function::Tan => {
            if u.cos() == 0.0 {
                return Err(DomainReason::Pole);
            }
            u.tan()
        }
        Function::Cot => {
            let s = u.sin();
            if s == 0.0 {
                return Err(DomainReason::Pole);
            }
            u.cos() / s
        }
        Function::Sec => {
            let c = u.cos();
            if c == 0.0 {
                return Err(DomainReason::Pole);
            }
            1.0 / c
        }
        Function::Csc => {
            let s = u.sin();
            if s == 0.0 {
                return Err(DomainReason::Pole);
            }
            1.0 / s
        }
        Function::Asin | Function::Acos if u.abs() > 1.0 => {
            return Err(DomainReason::OutsideFunctionDomain);
        }
        Function::Asin => u.asin(),
        Function::Acos => u.acos(),
        Function::Atan => u.atan(),
        Function::Sinh => u.sinh(),
        Function::Cosh => u.cosh(),
        Function::Tanh => u.tanh(),
        Function::Asinh => u.asinh(),
        Function::Acosh => {
            if u < 1.0 {
                return Err(DomainReason::OutsideFunctionDomain);
            }
            u.acosh()
        }
        Function::Atanh => {
            if u.abs() > 1.0 {
                return Err(DomainReason::OutsideFunctionDomain);
            }
            if u.abs() == 1.0 {
                return Err(DomainReason::Pole);
            }
            u.atanh()
        }
        Function::Exp => u.exp(),
        Function::Ln | Function::Log10 | Function::Log2 if u <= 0.0 => {
            return Err(DomainReason::LogOfNonPositive);
        }
        Function::Ln => u.ln(),
        Function::Log10 => u.log10(),
        Function::Log2 => u.log2(),
        Function::Sqrt => {
            if u < 0.0 {
                return Err(DomainReason::SqrtOfNegative);
            }
            u.sqrt()
        }
        Function::Cbrt => u.cbrt(),
        Function::Abs => u.abs(),
        Function::Sign => {
            if u > 0.0 {
                1.0
            } else if u < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        Function::Erf => special::erf(u),
        Function::Erfc => special::erfc(u),
        Function::Gamma | Function::Digamma | Function::Trigamma if non_positive_integer => {
            return Err(DomainReason::Pole);
        }
        Function::Gamma => special::gamma(u),
        Function::Digamma => special::digamma(u),
        Function::Trigamma => special::trigamma(u),
        Function::Factorial => {
            if u < 0.0 && is_integer(u) {
                return Err(DomainReason::Pole);
            }
            special::gamma(u + 1.0)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile;

    #[test]
    fn evaluates_with_slice_scope() {
        let expr = compile("a*x^2 + b").unwrap();
        let v = evaluate(&expr, &[("a", 2.0), ("b", 1.0), ("x", 3.0)]).unwrap();
        assert_eq!(v, 19.0);
    }

    #[test]
    fn shared_subexpressions_evaluate_once_and_agree() {
        let expr = compile("sin(x)^2 + cos(x)^2").unwrap();
        let v = evaluate(&expr, &[("x", 0.7)]).unwrap();
        assert!((v - 1.0).abs() < 1e-15);
    }

    #[test]
    fn log_of_negative_names_sub_expression() {
        let expr = compile("1 + ln(x)").unwrap();
        let err = evaluate(&expr, &[("x", -1.0)]).unwrap_err();
        assert_eq!(err.reason, DomainReason::LogOfNonPositive);
        assert_eq!(err.expression, "ln(x)");
    }

    #[test]
    fn division_by_zero_and_sqrt_of_negative() {
        let expr = compile("1/x").unwrap();
        assert_eq!(
            evaluate(&expr, &[("x", 0.0)]).unwrap_err().reason,
            DomainReason::DivisionByZero
        );
        let expr = compile("sqrt(x)").unwrap();
        assert_eq!(
            evaluate(&expr, &[("x", -4.0)]).unwrap_err().reason,
            DomainReason::SqrtOfNegative
        );
    }

    #[test]
    fn overflow_is_reported() {
        let expr = compile("exp(x)").unwrap();
        assert_eq!(
            evaluate(&expr, &[("x", 1000.0)]).unwrap_err().reason,
            DomainReason::Overflow
        );
    }

    #[test]
    fn negative_base_rules() {
        let expr = compile("x^a").unwrap();
        assert_eq!(evaluate(&expr, &[("x", -2.0), ("a", 3.0)]).unwrap(), -8.0);
        assert_eq!(
            evaluate(&expr, &[("x", -2.0), ("a", 0.5)]).unwrap_err().reason,
            DomainReason::NegativeBaseFractionalExponent
        );
    }

    #[test]
    fn unbound_symbol() {
        let expr = compile("a + x").unwrap();
        let err = evaluate(&expr, &[("x", 1.0)]).unwrap_err();
        assert_eq!(err.reason, DomainReason::UnboundSymbol);
        assert_eq!(err.expression, "a");
    }

    #[test]
    fn factorial_and_gamma_poles() {
        let expr = compile("x!").unwrap();
        assert!((evaluate(&expr, &[("x", 5.0)]).unwrap() - 120.0).abs() < 1e-9);
        assert_eq!(
            evaluate(&expr, &[("x", -1.0)]).unwrap_err().reason,
            DomainReason::Pole
        );
        let expr = compile("gamma(x)").unwrap();
        assert_eq!(
            evaluate(&expr, &[("x", 0.0)]).unwrap_err().reason,
            DomainReason::Pole
        );
    }

    #[test]
    fn inverse_trig_domain() {
        let expr = compile("asin(x)").unwrap();
        assert_eq!(
            evaluate(&expr, &[("x", 1.5)]).unwrap_err().reason,
            DomainReason::OutsideFunctionDomain
        );
    }
}
