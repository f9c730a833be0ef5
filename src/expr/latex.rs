//! LaTeX rendering.

use super::display::{format_number, precedence};
use super::{BinaryOp, CompiledExpression, Constant, Function, Node, NodeId, UnaryOp};

const GREEK: [&str; 24] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
    "lambda", "mu", "nu", "xi", "omicron", "rho", "sigma", "tau", "upsilon", "phi", "chi", "psi",
    "omega", "varphi",
];

/// LaTeX spelling of a symbol name.
///
/// Greek names become commands and a single `_` starts a subscript, so
/// `sigma_a` renders as `\sigma_{a}` and `x_0` as `x_{0}`.
pub fn symbol(name: &str) -> String {
    match name.split_once('_') {
        Some((base, sub)) if !base.is_empty() && !sub.is_empty() => {
            format!("{}_{{{}}}", symbol_base(base), symbol_base(sub))
        }
        _ => symbol_base(name),
    }
}

fn symbol_base(name: &str) -> String {
    if GREEK.contains(&name) {
        format!("\\{name}")
    } else if name.chars().count() > 1 && !name.chars().all(|c| c.is_ascii_digit()) {
        format!("\\mathrm{{{name}}}")
    } else {
        name.to_string()
    }
}

fn number(v: f64) -> String {
    let text = format_number(v);
    match text.split_once('e') {
        Some((mantissa, exp)) => format!("{mantissa} \\cdot 10^{{{exp}}}"),
        None => text,
    }
}

/// Render the sub-expression rooted at `id`.
pub fn render(expr: &CompiledExpression, id: NodeId) -> String {
    match expr.node(id) {
        Node::Const(v) => number(*v),
        Node::Named(Constant::Pi) => "\\pi".to_string(),
        Node::Named(Constant::E) => "e".to_string(),
        Node::Symbol(name) => symbol(name),
        Node::Unary(UnaryOp::Neg, a) => format!("-{}", child(expr, *a, 3)),
        Node::Binary(BinaryOp::Add, a, b) => {
            format!("{} + {}", child(expr, *a, 1), child(expr, *b, 2))
        }
        Node::Binary(BinaryOp::Sub, a, b) => {
            format!("{} - {}", child(expr, *a, 1), child(expr, *b, 2))
        }
        Node::Binary(BinaryOp::Mul, a, b) => {
            format!("{} \\cdot {}", child(expr, *a, 2), child(expr, *b, 3))
        }
        Node::Binary(BinaryOp::Div, a, b) => {
            format!("\\frac{{{}}}{{{}}}", render(expr, *a), render(expr, *b))
        }
        Node::Binary(BinaryOp::Pow, a, b) => {
            if expr.node(*b) == &Node::Const(0.5) {
                return format!("\\sqrt{{{}}}", render(expr, *a));
            }
            format!("{{{}}}^{{{}}}", child(expr, *a, 5), render(expr, *b))
        }
        Node::Call(f, a) => call(expr, *f, *a),
    }
}

fn child(expr: &CompiledExpression, id: NodeId, min_prec: u8) -> String {
    let inner = render(expr, id);
    if precedence(expr, id) < min_prec {
        format!("\\left({inner}\\right)")
    } else {
        inner
    }
}

fn call(expr: &CompiledExpression, f: Function, a: NodeId) -> String {
    let arg = render(expr, a);
    let wrapped = format!("\\left({arg}\\right)");
    match f {
        Function::Sqrt => format!("\\sqrt{{{arg}}}"),
        Function::Cbrt => format!("\\sqrt[3]{{{arg}}}"),
        Function::Abs => format!("\\left|{arg}\\right|"),
        Function::Exp => format!("e^{{{arg}}}"),
        Function::Factorial => format!("{}!", child(expr, a, 5)),
        Function::Log10 => format!("\\log_{{10}}{wrapped}"),
        Function::Log2 => format!("\\log_{{2}}{wrapped}"),
        Function::Gamma => format!("\\Gamma{wrapped}"),
        Function::Digamma => format!("\\psi{wrapped}"),
        Function::Trigamma => format!("\\psi_{{1}}{wrapped}"),
        Function::Sin
        | Function::Cos
        | Function::Tan
        | Function::Cot
        | Function::Sec
        | Function::Csc
        | Function::Sinh
        | Function::Cosh
        | Function::Tanh
        | Function::Ln => format!("\\{}{wrapped}", f.name()),
        Function::Asin => format!("\\arcsin{wrapped}"),
        Function::Acos => format!("\\arccos{wrapped}"),
        Function::Atan => format!("\\arctan{wrapped}"),
        Function::Sign => format!("\\operatorname{{sgn}}{wrapped}"),
        Function::Asinh | Function::Acosh | Function::Atanh | Function::Erf | Function::Erfc => {
            format!("\\operatorname{{{}}}{wrapped}", f.name())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile;

    #[test]
    fn symbols_with_subscripts_and_greek() {
        assert_eq!(symbol("sigma_a"), "\\sigma_{a}");
        assert_eq!(symbol("x_0"), "x_{0}");
        assert_eq!(symbol("theta"), "\\theta");
        assert_eq!(symbol("k"), "k");
    }

    #[test]
    fn renders_fractions_and_functions() {
        let expr = compile("a*sin(x)/sqrt(b)").unwrap();
        assert_eq!(expr.to_latex(), "\\frac{a \\cdot \\sin\\left(x\\right)}{\\sqrt{b}}");
    }

    #[test]
    fn renders_powers_with_grouped_base() {
        let expr = compile("(x+1)^2").unwrap();
        assert_eq!(expr.to_latex(), "{\\left(x + 1\\right)}^{2}");
    }

    #[test]
    fn scientific_constants_use_cdot() {
        let expr = compile("1e-10*x").unwrap();
        assert_eq!(expr.to_latex(), "1 \\cdot 10^{-10} \\cdot x");
    }
}
