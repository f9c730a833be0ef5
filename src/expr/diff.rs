//! Symbolic differentiation.
//!
//! Derivatives are built into an [`ExprBuilder`] that already holds the source
//! arena, so `d/dx exp(u)` points at the existing `exp(u)` node rather than a
//! copy. Nodes are visited in post-order and each node's derivative is
//! memoized, which keeps shared sub-expressions linear in cost.

use std::collections::HashMap;

use super::{BinaryOp, CompiledExpression, Constant, ExprBuilder, Function, Node, NodeId, UnaryOp};
use crate::error::DifferentiationError;

/// Derivative of `expr` with respect to `var`.
pub fn differentiate(expr: &CompiledExpression, var: &str) -> Result<CompiledExpression, DifferentiationError> {
    let mut builder = ExprBuilder::extend(expr);
    let root = derive_into(&mut builder, expr, var)?;
    Ok(builder.finish(root, expr.independent()))
}

/// Derivatives with respect to several symbols, sharing one arena.
pub fn gradient<S: AsRef<str>>(
    expr: &CompiledExpression,
    vars: &[S],
) -> Result<Vec<CompiledExpression>, DifferentiationError> {
    let mut builder = ExprBuilder::extend(expr);
    let roots = vars
        .iter()
        .map(|v| derive_into(&mut builder, expr, v.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let shared = builder.finish(expr.root(), expr.independent());
    Ok(roots.into_iter().map(|r| shared.rooted_at(r)).collect())
}

/// Build `d expr / d var` inside `builder` and return its root.
///
/// `builder` must have been created with [`ExprBuilder::extend`] from `expr`
/// (or from an expression whose arena `expr`'s arena is a prefix of).
pub(crate) fn derive_into(
    builder: &mut ExprBuilder,
    expr: &CompiledExpression,
    var: &str,
) -> Result<NodeId, DifferentiationError> {
    let mut memo: HashMap<NodeId, NodeId> = HashMap::with_capacity(expr.schedule().len());

    for &id in expr.schedule() {
        let d = |memo: &HashMap<NodeId, NodeId>, child: NodeId| memo[&child];
        let derivative = match expr.node(id).clone() {
            Node::Const(_) | Node::Named(_) => builder.constant(0.0),
            Node::Symbol(name) => builder.constant(if &*name == var { 1.0 } else { 0.0 }),
            Node::Unary(UnaryOp::Neg, a) => {
                let da = d(&memo, a);
                builder.neg(da)
            }
            Node::Binary(op, a, b) => {
                let (da, db) = (d(&memo, a), d(&memo, b));
                binary(builder, op, a, b, da, db)
            }
            Node::Call(f, u) => {
                let du = d(&memo, u);
                if builder.constant_value(du) == Some(0.0) {
                    builder.constant(0.0)
                } else {
                    let outer = function_derivative(builder, f, u, id)?;
                    times(builder, outer, du)
                }
            }
        };
        memo.insert(id, derivative);
    }

    Ok(memo[&expr.root()])
}

fn is_zero(builder: &ExprBuilder, id: NodeId) -> bool {
    builder.constant_value(id) == Some(0.0)
}

/// `l * r` for derivative terms. A zero factor means the term does not depend
/// on the variable, so the other operand is dropped even if it could fail.
fn times(builder: &mut ExprBuilder, l: NodeId, r: NodeId) -> NodeId {
    if is_zero(builder, l) || is_zero(builder, r) {
        builder.constant(0.0)
    } else {
        builder.mul(l, r)
    }
}

fn binary(builder: &mut ExprBuilder, op: BinaryOp, a: NodeId, b: NodeId, da: NodeId, db: NodeId) -> NodeId {
    match op {
        BinaryOp::Add => builder.add(da, db),
        BinaryOp::Sub => builder.sub(da, db),
        BinaryOp::Mul => {
            let left = times(builder, da, b);
            let right = times(builder, a, db);
            builder.add(left, right)
        }
        BinaryOp::Div => {
            match (is_zero(builder, da), is_zero(builder, db)) {
                (true, true) => return builder.constant(0.0),
                (false, true) => return builder.div(da, b),
                _ => {}
            }
            // (a' b - a b') / b²
            let left = times(builder, da, b);
            let right = times(builder, a, db);
            let numer = builder.sub(left, right);
            let two = builder.constant(2.0);
            let denom = builder.pow(b, two);
            builder.div(numer, denom)
        }
        BinaryOp::Pow => {
            let base_const = is_zero(builder, da);
            let exp_const = is_zero(builder, db);
            match (base_const, exp_const) {
                (true, true) => builder.constant(0.0),
                // b a^(b-1) a'
                (false, true) => {
                    let one = builder.constant(1.0);
                    let lowered = builder.sub(b, one);
                    let p = builder.pow(a, lowered);
                    let scaled = builder.mul(b, p);
                    builder.mul(scaled, da)
                }
                // a^b ln(a) b'
                (true, false) => {
                    let pow = builder.pow(a, b);
                    let ln = builder.call(Function::Ln, a);
                    let t = builder.mul(pow, ln);
                    builder.mul(t, db)
                }
                // a^b (b' ln(a) + b a' / a)
                (false, false) => {
                    let pow = builder.pow(a, b);
                    let ln = builder.call(Function::Ln, a);
                    let first = builder.mul(db, ln);
                    let bda = builder.mul(b, da);
                    let second = builder.div(bda, a);
                    let sum = builder.add(first, second);
                    builder.mul(pow, sum)
                }
            }
        }
    }
}

/// `f'(u)` for `node = f(u)`.
fn function_derivative(
    b: &mut ExprBuilder,
    f: Function,
    u: NodeId,
    node: NodeId,
) -> Result<NodeId, DifferentiationError> {
    let one = b.constant(1.0);
    let two = b.constant(2.0);
    let u2 = b.pow(u, two);

    let d = match f {
        Function::Sin => b.call(Function::Cos, u),
        Function::Cos => {
            let s = b.call(Function::Sin, u);
            b.neg(s)
        }
        Function::Tan => {
            let c = b.call(Function::Cos, u);
            let c2 = b.pow(c, two);
            b.div(one, c2)
        }
        Function::Cot => {
            let s = b.call(Function::Sin, u);
            let s2 = b.pow(s, two);
            let q = b.div(one, s2);
            b.neg(q)
        }
        Function::Sec => {
            let t = b.call(Function::Tan, u);
            b.mul(node, t)
        }
        Function::Csc => {
            let c = b.call(Function::Cot, u);
            let p = b.mul(node, c);
            b.neg(p)
        }
        Function::Asin | Function::Acos => {
            let r = b.sub(one, u2);
            let s = b.call(Function::Sqrt, r);
            let q = b.div(one, s);
            if f == Function::Acos { b.neg(q) } else { q }
        }
        Function::Atan => {
            let r = b.add(one, u2);
            b.div(one, r)
        }
        Function::Sinh => b.call(Function::Cosh, u),
        Function::Cosh => b.call(Function::Sinh, u),
        Function::Tanh => {
            let t2 = b.pow(node, two);
            b.sub(one, t2)
        }
        Function::Asinh => {
            let r = b.add(u2, one);
            let s = b.call(Function::Sqrt, r);
            b.div(one, s)
        }
        Function::Acosh => {
            let r = b.sub(u2, one);
            let s = b.call(Function::Sqrt, r);
            b.div(one, s)
        }
        Function::Atanh => {
            let r = b.sub(one, u2);
            b.div(one, r)
        }
        Function::Exp => node,
        Function::Ln => b.div(one, u),
        Function::Log10 | Function::Log2 => {
            let base = b.constant(if f == Function::Log10 { 10.0 } else { 2.0 });
            let ln_base = b.call(Function::Ln, base);
            let denom = b.mul(u, ln_base);
            b.div(one, denom)
        }
        Function::Sqrt => {
            let denom = b.mul(two, node);
            b.div(one, denom)
        }
        Function::Cbrt => {
            let three = b.constant(3.0);
            let sq = b.pow(node, two);
            let denom = b.mul(three, sq);
            b.div(one, denom)
        }
        Function::Abs => b.call(Function::Sign, u),
        Function::Sign => b.constant(0.0),
        Function::Erf | Function::Erfc => {
            // ±2/√π · e^{-u²}
            let pi = b.named(Constant::Pi);
            let root_pi = b.call(Function::Sqrt, pi);
            let coeff = b.div(two, root_pi);
            let neg_u2 = b.neg(u2);
            let gauss = b.call(Function::Exp, neg_u2);
            let d = b.mul(coeff, gauss);
            if f == Function::Erfc { b.neg(d) } else { d }
        }
        Function::Gamma => {
            let psi = b.call(Function::Digamma, u);
            b.mul(node, psi)
        }
        Function::Digamma => b.call(Function::Trigamma, u),
        Function::Trigamma => {
            return Err(DifferentiationError { function: f.name() });
        }
        Function::Factorial => {
            let shifted = b.add(u, one);
            let psi = b.call(Function::Digamma, shifted);
            b.mul(node, psi)
        }
    };
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{compile, evaluate};

    fn check_against_finite_difference(text: &str, at: f64) {
        let expr = compile(text).unwrap();
        let d = differentiate(&expr, "x").unwrap();
        let h = 1e-6 * at.abs().max(1.0);
        let f = |x: f64| evaluate(&expr, &[("x", x)]).unwrap();
        let numeric = (f(at + h) - f(at - h)) / (2.0 * h);
        let exact = evaluate(&d, &[("x", at)]).unwrap();
        assert!(
            (exact - numeric).abs() <= 1e-6 * numeric.abs().max(1.0),
            "{text}: d = {d}, exact {exact}, numeric {numeric}"
        );
    }

    #[test]
    fn elementary_rules_match_finite_differences() {
        for text in [
            "x^3 - 2x", "sin(x)*cos(x)", "exp(2x)/x", "ln(x^2 + 1)", "sqrt(x)", "tan(x)",
            "atan(x)", "asin(x/2)", "acos(x/2)", "tanh(x)", "x^x", "2^x", "log10(x)", "log2(x)",
            "cbrt(x)", "erf(x)", "erfc(x)", "gamma(x)", "x!", "sec(x)", "csc(x)", "cot(x)",
            "asinh(x)", "acosh(x + 1)", "atanh(x/2)", "abs(x - 5)", "digamma(x)",
        ] {
            check_against_finite_difference(text, 1.3);
        }
    }

    #[test]
    fn folds_constants_in_results() {
        let expr = compile("3x + 2").unwrap();
        let d = differentiate(&expr, "x").unwrap();
        assert_eq!(d.to_string(), "3");

        let expr = compile("a*x^2").unwrap();
        assert_eq!(differentiate(&expr, "x").unwrap().to_string(), "a * (2 * x)");
        assert_eq!(differentiate(&expr, "a").unwrap().to_string(), "x^2");
    }

    #[test]
    fn derivative_with_respect_to_absent_symbol_is_zero() {
        let expr = compile("sin(x)").unwrap();
        let d = differentiate(&expr, "q").unwrap();
        assert_eq!(d.as_constant(), Some(0.0));
    }

    #[test]
    fn terms_without_the_variable_vanish_from_derivatives() {
        let expr = compile("a*ln(x) + b/ln(x)").unwrap();
        let d = differentiate(&expr, "c").unwrap();
        assert_eq!(d.as_constant(), Some(0.0));
        assert_eq!(differentiate(&expr, "a").unwrap().to_string(), "ln(x)");

        let expr = compile("2/ln(x)").unwrap();
        assert_eq!(differentiate(&expr, "a").unwrap().as_constant(), Some(0.0));
    }

    #[test]
    fn exp_derivative_reuses_existing_node() {
        let expr = compile("exp(x)").unwrap();
        let d = differentiate(&expr, "x").unwrap();
        assert_eq!(d.root(), expr.root());
    }

    #[test]
    fn trigamma_has_no_derivative_rule() {
        let expr = compile("trigamma(x)").unwrap();
        let err = differentiate(&expr, "x").unwrap_err();
        assert_eq!(err.function, "trigamma");
        // Independent of the target: no rule needed.
        assert!(differentiate(&expr, "a").is_ok());
    }

    #[test]
    fn gradient_shares_one_arena() {
        let expr = compile("a*exp(b*x)").unwrap();
        let grad = gradient(&expr, &["a", "b"]).unwrap();
        assert_eq!(grad.len(), 2);
        let da = evaluate(&grad[0], &[("b", 0.5), ("x", 2.0)]).unwrap();
        assert!((da - 1f64.exp()).abs() < 1e-12);
        let db = evaluate(&grad[1], &[("a", 3.0), ("b", 0.5), ("x", 2.0)]).unwrap();
        assert!((db - 6.0 * 1f64.exp()).abs() < 1e-12);
    }
}
