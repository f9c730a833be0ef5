//! Symbolic expressions.
//!
//! Expressions live in an append-only arena of [`Node`]s addressed by
//! [`NodeId`]. The [`ExprBuilder`] hash-conses nodes, so identical
//! sub-expressions are stored once and derivatives built on top of an
//! expression reuse its nodes instead of copying them.
//!
//! A finished [`CompiledExpression`] is immutable and cheap to clone (the arena
//! sits behind an `Arc`), so fits running on worker threads share one copy.
//!
//! Submodules:
//! - `lexer` / `parser`: formula text to arena
//! - `diff`: symbolic differentiation
//! - `eval`: numeric evaluation with domain checks
//! - `display` / `latex`: infix and LaTeX rendering

pub mod diff;
pub mod display;
pub mod eval;
pub mod latex;
pub mod lexer;
pub mod parser;

use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub use diff::differentiate;
pub use eval::{Scope, evaluate};
pub use parser::{Compiler, compile};

/// Index of a node inside an expression arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Named mathematical constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Pi,
    E,
}

impl Constant {
    pub fn value(self) -> f64 {
        match self {
            Constant::Pi => std::f64::consts::PI,
            Constant::E => std::f64::consts::E,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Constant::Pi => "pi",
            Constant::E => "e",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pi" | "π" => Some(Constant::Pi),
            "e" => Some(Constant::E),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }
}

/// Single-argument functions understood by the parser and evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Cot,
    Sec,
    Csc,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Exp,
    Ln,
    Log10,
    Log2,
    Sqrt,
    Cbrt,
    Abs,
    Sign,
    Erf,
    Erfc,
    Gamma,
    Digamma,
    Trigamma,
    Factorial,
}

impl Function {
    /// Canonical name used by the infix renderer.
    pub fn name(self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Cot => "cot",
            Function::Sec => "sec",
            Function::Csc => "csc",
            Function::Asin => "asin",
            Function::Acos => "acos",
            Function::Atan => "atan",
            Function::Sinh => "sinh",
            Function::Cosh => "cosh",
            Function::Tanh => "tanh",
            Function::Asinh => "asinh",
            Function::Acosh => "acosh",
            Function::Atanh => "atanh",
            Function::Exp => "exp",
            Function::Ln => "ln",
            Function::Log10 => "log10",
            Function::Log2 => "log2",
            Function::Sqrt => "sqrt",
            Function::Cbrt => "cbrt",
            Function::Abs => "abs",
            Function::Sign => "sign",
            Function::Erf => "erf",
            Function::Erfc => "erfc",
            Function::Gamma => "gamma",
            Function::Digamma => "digamma",
            Function::Trigamma => "trigamma",
            Function::Factorial => "factorial",
        }
    }

    /// Look up a function by name. `log` is the natural logarithm; `sen` and
    /// `arc*` spellings are accepted as aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name {
            "sin" | "sen" => Function::Sin,
            "cos" => Function::Cos,
            "tan" | "tg" => Function::Tan,
            "cot" | "cotan" => Function::Cot,
            "sec" => Function::Sec,
            "csc" | "cosec" => Function::Csc,
            "asin" | "arcsin" => Function::Asin,
            "acos" | "arccos" => Function::Acos,
            "atan" | "arctan" => Function::Atan,
            "sinh" => Function::Sinh,
            "cosh" => Function::Cosh,
            "tanh" => Function::Tanh,
            "asinh" | "arcsinh" => Function::Asinh,
            "acosh" | "arccosh" => Function::Acosh,
            "atanh" | "arctanh" => Function::Atanh,
            "exp" => Function::Exp,
            "ln" | "log" => Function::Ln,
            "log10" => Function::Log10,
            "log2" => Function::Log2,
            "sqrt" => Function::Sqrt,
            "cbrt" => Function::Cbrt,
            "abs" => Function::Abs,
            "sign" | "sgn" => Function::Sign,
            "erf" => Function::Erf,
            "erfc" => Function::Erfc,
            "gamma" => Function::Gamma,
            "digamma" | "psi" => Function::Digamma,
            "trigamma" => Function::Trigamma,
            "factorial" => Function::Factorial,
            _ => return None,
        };
        Some(f)
    }
}

/// One arena node. Children always have smaller ids than their parent.
#[derive(Debug, Clone)]
pub enum Node {
    Const(f64),
    Named(Constant),
    Symbol(Arc<str>),
    Unary(UnaryOp, NodeId),
    Binary(BinaryOp, NodeId, NodeId),
    Call(Function, NodeId),
}

impl Node {
    fn children(&self) -> impl Iterator<Item = NodeId> {
        let (a, b) = match *self {
            Node::Unary(_, a) | Node::Call(_, a) => (Some(a), None),
            Node::Binary(_, a, b) => (Some(a), Some(b)),
            _ => (None, None),
        };
        a.into_iter().chain(b)
    }
}

// Constants compare by bit pattern so the arena can hash-cons them. `-0.0` is
// normalized to `0.0` on construction.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Const(a), Node::Const(b)) => a.to_bits() == b.to_bits(),
            (Node::Named(a), Node::Named(b)) => a == b,
            (Node::Symbol(a), Node::Symbol(b)) => a == b,
            (Node::Unary(o1, a1), Node::Unary(o2, a2)) => o1 == o2 && a1 == a2,
            (Node::Binary(o1, a1, b1), Node::Binary(o2, a2, b2)) => o1 == o2 && a1 == a2 && b1 == b2,
            (Node::Call(f1, a1), Node::Call(f2, a2)) => f1 == f2 && a1 == a2,
            _ => false,
        }
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Node::Const(v) => v.to_bits().hash(state),
            Node::Named(c) => c.hash(state),
            Node::Symbol(s) => s.hash(state),
            Node::Unary(op, a) => {
                op.hash(state);
                a.hash(state);
            }
            Node::Binary(op, a, b) => {
                op.hash(state);
                a.hash(state);
                b.hash(state);
            }
            Node::Call(f, a) => {
                f.hash(state);
                a.hash(state);
            }
        }
    }
}

/// Hash-consing arena builder with constant folding.
///
/// Always folded: arithmetic on two finite literals (never `c / 0`), `u + 0`,
/// `u - 0`, `0 - u`, `u * 1`, `u / 1`, `u ^ 1` and `--u`.
///
/// Identities that discard an operand (`u * 0`, `0 / u`, `u - u`, `u ^ 0`,
/// `1 ^ u`) fold only when the discarded subtree contains no function call,
/// division or power, so a domain error inside it still surfaces at evaluation.
#[derive(Debug, Clone, Default)]
pub struct ExprBuilder {
    nodes: Vec<Node>,
    index: HashMap<Node, NodeId>,
    /// Per node: whether its subtree can raise a domain error.
    fallible: Vec<bool>,
}

impl ExprBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing expression's arena so new nodes can refer to it.
    pub fn extend(expr: &CompiledExpression) -> Self {
        let nodes = expr.inner.nodes.to_vec();
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), NodeId(i as u32)))
            .collect();
        let mut fallible = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let f = node_may_fail(node, &fallible);
            fallible.push(f);
        }
        Self { nodes, index, fallible }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn intern(&mut self, node: Node) -> NodeId {
        if let Some(&id) = self.index.get(&node) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.fallible.push(node_may_fail(&node, &self.fallible));
        self.nodes.push(node.clone());
        self.index.insert(node, id);
        id
    }

    /// Whether evaluating `id` could fail with a domain error.
    pub fn may_fail(&self, id: NodeId) -> bool {
        self.fallible[id.index()]
    }

    /// Literal value of a `Const` node.
    pub fn constant_value(&self, id: NodeId) -> Option<f64> {
        match self.node(id) {
            Node::Const(v) => Some(*v),
            _ => None,
        }
    }

    pub fn constant(&mut self, value: f64) -> NodeId {
        let value = if value == 0.0 { 0.0 } else { value };
        self.intern(Node::Const(value))
    }

    pub fn named(&mut self, c: Constant) -> NodeId {
        self.intern(Node::Named(c))
    }

    pub fn symbol(&mut self, name: &str) -> NodeId {
        self.intern(Node::Symbol(Arc::from(name)))
    }

    pub fn neg(&mut self, a: NodeId) -> NodeId {
        if let Some(v) = self.constant_value(a) {
            return self.constant(-v);
        }
        if let Node::Unary(UnaryOp::Neg, inner) = *self.node(a) {
            return inner;
        }
        self.intern(Node::Unary(UnaryOp::Neg, a))
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        match (self.constant_value(a), self.constant_value(b)) {
            (Some(x), Some(y)) if (x + y).is_finite() => return self.constant(x + y),
            (Some(x), None) if x == 0.0 => return b,
            (None, Some(y)) if y == 0.0 => return a,
            (None, Some(y)) if y < 0.0 => {
                let c = self.constant(-y);
                return self.intern(Node::Binary(BinaryOp::Sub, a, c));
            }
            _ => {}
        }
        if let Node::Unary(UnaryOp::Neg, inner) = *self.node(b) {
            return self.sub(a, inner);
        }
        self.intern(Node::Binary(BinaryOp::Add, a, b))
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        match (self.constant_value(a), self.constant_value(b)) {
            (Some(x), Some(y)) if (x - y).is_finite() => return self.constant(x - y),
            (Some(x), None) if x == 0.0 => return self.neg(b),
            (None, Some(y)) if y == 0.0 => return a,
            (None, Some(y)) if y < 0.0 => {
                let c = self.constant(-y);
                return self.intern(Node::Binary(BinaryOp::Add, a, c));
            }
            _ => {}
        }
        if a == b && !self.may_fail(a) {
            return self.constant(0.0);
        }
        self.intern(Node::Binary(BinaryOp::Sub, a, b))
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        match (self.constant_value(a), self.constant_value(b)) {
            (Some(x), Some(y)) if (x * y).is_finite() => return self.constant(x * y),
            (Some(x), _) if x == 0.0 && !self.may_fail(b) => return self.constant(0.0),
            (_, Some(y)) if y == 0.0 && !self.may_fail(a) => return self.constant(0.0),
            (Some(x), _) if x == 1.0 => return b,
            (_, Some(y)) if y == 1.0 => return a,
            (Some(x), _) if x == -1.0 => return self.neg(b),
            (_, Some(y)) if y == -1.0 => return self.neg(a),
            // Keep constants on the left: `c * u`.
            (None, Some(_)) => return self.mul(b, a),
            _ => {}
        }
        self.intern(Node::Binary(BinaryOp::Mul, a, b))
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> NodeId {
        match (self.constant_value(a), self.constant_value(b)) {
            (Some(x), Some(y)) if y != 0.0 && (x / y).is_finite() => return self.constant(x / y),
            (Some(x), None) if x == 0.0 && !self.may_fail(b) => return self.constant(0.0),
            (_, Some(y)) if y == 1.0 => return a,
            (_, Some(y)) if y == -1.0 => return self.neg(a),
            _ => {}
        }
        self.intern(Node::Binary(BinaryOp::Div, a, b))
    }

    pub fn pow(&mut self, a: NodeId, b: NodeId) -> NodeId {
        match (self.constant_value(a), self.constant_value(b)) {
            (Some(x), Some(y)) => {
                let v = x.powf(y);
                if v.is_finite() {
                    return self.constant(v);
                }
            }
            (_, Some(y)) if y == 0.0 && !self.may_fail(a) => return self.constant(1.0),
            (_, Some(y)) if y == 1.0 => return a,
            (Some(x), _) if x == 1.0 && !self.may_fail(b) => return self.constant(1.0),
            _ => {}
        }
        self.intern(Node::Binary(BinaryOp::Pow, a, b))
    }

    pub fn call(&mut self, f: Function, a: NodeId) -> NodeId {
        self.intern(Node::Call(f, a))
    }

    pub fn binary(&mut self, op: BinaryOp, a: NodeId, b: NodeId) -> NodeId {
        match op {
            BinaryOp::Add => self.add(a, b),
            BinaryOp::Sub => self.sub(a, b),
            BinaryOp::Mul => self.mul(a, b),
            BinaryOp::Div => self.div(a, b),
            BinaryOp::Pow => self.pow(a, b),
        }
    }

    /// Freeze the arena with `root` as the expression entry point.
    pub fn finish(self, root: NodeId, independent: Option<&str>) -> CompiledExpression {
        CompiledExpression::from_arena(self.nodes.into(), root, independent.map(str::to_string))
    }
}

/// Calls, divisions and powers can fail; everything else inherits from its operands.
fn node_may_fail(node: &Node, known: &[bool]) -> bool {
    match node {
        Node::Const(_) | Node::Named(_) | Node::Symbol(_) => false,
        Node::Call(..) | Node::Binary(BinaryOp::Div | BinaryOp::Pow, ..) => true,
        Node::Unary(_, a) => known[a.index()],
        Node::Binary(_, a, b) => known[a.index()] || known[b.index()],
    }
}

#[derive(Debug)]
struct Inner {
    nodes: Arc<[Node]>,
    root: NodeId,
    schedule: Vec<NodeId>,
    symbols: Vec<String>,
    independent: Option<String>,
}

/// Immutable, shareable expression.
///
/// Besides the arena it carries the post-order evaluation schedule of the
/// nodes reachable from the root, the sorted set of free symbols, and the name
/// of the independent variable if the expression is a model.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    inner: Arc<Inner>,
}

impl CompiledExpression {
    fn from_arena(nodes: Arc<[Node]>, root: NodeId, independent: Option<String>) -> Self {
        let schedule = post_order(&nodes, root);
        let symbols: BTreeSet<String> = schedule
            .iter()
            .filter_map(|id| match &nodes[id.index()] {
                Node::Symbol(name) => Some(name.to_string()),
                _ => None,
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                nodes,
                root,
                schedule,
                symbols: symbols.into_iter().collect(),
                independent,
            }),
        }
    }

    /// Same arena, different entry point.
    pub fn rooted_at(&self, root: NodeId) -> Self {
        Self::from_arena(self.inner.nodes.clone(), root, self.inner.independent.clone())
    }

    /// Same expression with a different independent variable.
    pub fn with_independent(&self, name: Option<&str>) -> Self {
        Self {
            inner: Arc::new(Inner {
                nodes: self.inner.nodes.clone(),
                root: self.inner.root,
                schedule: self.inner.schedule.clone(),
                symbols: self.inner.symbols.clone(),
                independent: name.map(str::to_string),
            }),
        }
    }

    pub fn root(&self) -> NodeId {
        self.inner.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.inner.nodes[id.index()]
    }

    /// Post-order schedule: every node appears after its children.
    pub fn schedule(&self) -> &[NodeId] {
        &self.inner.schedule
    }

    pub(crate) fn arena_len(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Free symbols, sorted by name.
    pub fn symbols(&self) -> &[String] {
        &self.inner.symbols
    }

    pub fn independent(&self) -> Option<&str> {
        self.inner.independent.as_deref()
    }

    /// Free symbols other than the independent variable, sorted by name.
    pub fn parameters(&self) -> Vec<String> {
        self.symbols()
            .iter()
            .filter(|s| Some(s.as_str()) != self.independent())
            .cloned()
            .collect()
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        self.symbols().iter().any(|s| s == name)
    }

    /// Value of the root when it is a literal constant.
    pub fn as_constant(&self) -> Option<f64> {
        match self.node(self.root()) {
            Node::Const(v) => Some(*v),
            _ => None,
        }
    }

    /// LaTeX rendering of the whole expression.
    pub fn to_latex(&self) -> String {
        latex::render(self, self.root())
    }
}

fn post_order(nodes: &[Node], root: NodeId) -> Vec<NodeId> {
    let mut visited = vec![false; nodes.len()];
    let mut order = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if visited[id.index()] {
            continue;
        }
        if expanded {
            visited[id.index()] = true;
            order.push(id);
            continue;
        }
        stack.push((id, true));
        for child in nodes[id.index()].children() {
            if !visited[child.index()] {
                stack.push((child, false));
            }
        }
    }
    order
}
