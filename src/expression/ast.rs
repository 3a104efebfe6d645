//! Expression syntax tree.

use std::fmt;

use crate::value::format_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    ColumnRef(String),
    Binary {
        op: BinaryOp,
        left: Box<AstNode>,
        right: Box<AstNode>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<AstNode>,
    },
    Call {
        name: String,
        args: Vec<AstNode>,
    },
    Array(Vec<AstNode>),
}

impl AstNode {
    pub fn binary(op: BinaryOp, left: AstNode, right: AstNode) -> Self {
        AstNode::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: AstNode) -> Self {
        AstNode::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Direct children, left to right.
    pub fn children(&self) -> Vec<&AstNode> {
        match self {
            AstNode::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            AstNode::Unary { operand, .. } => vec![operand.as_ref()],
            AstNode::Call { args, .. } => args.iter().collect(),
            AstNode::Array(items) => items.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a AstNode)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Post-order traversal: every child is visited before its parent.
    pub fn walk_post<'a>(&'a self, visit: &mut impl FnMut(&'a AstNode)) {
        for child in self.children() {
            child.walk_post(visit);
        }
        visit(self);
    }

    /// Bottom-up fold. `combine` receives a node and the folded results of
    /// its children.
    pub fn fold<T>(&self, combine: &mut impl FnMut(&AstNode, Vec<T>) -> T) -> T {
        let folded = self
            .children()
            .into_iter()
            .map(|child| child.fold(combine))
            .collect();
        combine(self, folded)
    }

    /// Referenced column names, unique, in first-appearance order.
    pub fn column_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        self.walk(&mut |node| {
            if let AstNode::ColumnRef(name) = node {
                if !refs.contains(name) {
                    refs.push(name.clone());
                }
            }
        });
        refs
    }

    /// Function calls in post-order.
    pub fn calls(&self) -> Vec<(&str, &[AstNode])> {
        let mut calls = Vec::new();
        self.walk_post(&mut |node| {
            if let AstNode::Call { name, args } = node {
                calls.push((name.as_str(), args.as_slice()));
            }
        });
        calls
    }
}

fn write_ident(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    let bare = name
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
        && !matches!(name.to_ascii_lowercase().as_str(), "true" | "false" | "null");
    if bare {
        f.write_str(name)
    } else {
        write!(f, "`{}`", name)
    }
}

/// Renders fully parenthesized source that parses back to the same tree.
impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstNode::Number(n) => f.write_str(&format_number(*n)),
            AstNode::String(s) => {
                write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
            }
            AstNode::Boolean(b) => write!(f, "{}", b),
            AstNode::Null => f.write_str("null"),
            AstNode::ColumnRef(name) => write_ident(f, name),
            AstNode::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            AstNode::Unary { op, operand } => write!(f, "{}{}", op.symbol(), operand),
            AstNode::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            AstNode::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}
