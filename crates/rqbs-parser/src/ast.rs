//! Abstract Syntax Tree definitions for rqbs item files, scripts and expressions

use std::fmt;

/// Source location span (byte offsets)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// The source text covered by this span
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start..self.end).unwrap_or("")
    }
}

/// A node with associated source span
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Simple identifier
pub type Identifier = Spanned<String>;

/// Qualified identifier (e.g., `cpp.defines`)
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedIdent {
    pub parts: Vec<Identifier>,
}

impl QualifiedIdent {
    pub fn simple(name: Identifier) -> Self {
        Self { parts: vec![name] }
    }

    pub fn span(&self) -> Span {
        match (self.parts.first(), self.parts.last()) {
            (Some(first), Some(last)) => first.span.merge(last.span),
            _ => Span::default(),
        }
    }

    /// The name segments as plain strings
    pub fn segments(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.node.clone()).collect()
    }

    pub fn is_simple(&self) -> bool {
        self.parts.len() == 1
    }
}

impl fmt::Display for QualifiedIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = self
            .parts
            .iter()
            .map(|p| p.node.as_str())
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{}", s)
    }
}

// =============================================================================
// Files
// =============================================================================

/// A complete item file: imports followed by exactly one root item
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub imports: Vec<Import>,
    pub root: ItemDef,
    pub span: Span,
}

/// Import statement
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub kind: ImportKind,
    pub version: Option<String>,
    pub alias: Option<Identifier>,
    pub span: Span,
}

/// What an import refers to
#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    /// `import "dir"` or `import "file.js" as Name`
    Path(String),
    /// `import FileInfo` or `import qbs.FileInfo`
    Namespace(QualifiedIdent),
}

/// An item definition: `TypeName { members }`
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDef {
    pub type_name: QualifiedIdent,
    pub members: Vec<ItemMember>,
    pub span: Span,
}

/// Member of an item definition
#[derive(Debug, Clone, PartialEq)]
pub enum ItemMember {
    Binding(Binding),
    PropertyDecl(PropertyDecl),
    Child(ItemDef),
}

/// Property binding: `name: value` or `module.name: value`
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: QualifiedIdent,
    pub value: BindingValue,
    pub span: Span,
}

/// Property declaration: `[readonly] property type name [: value]`
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDecl {
    pub readonly: bool,
    pub type_name: Identifier,
    pub name: Identifier,
    pub value: Option<BindingValue>,
    pub span: Span,
}

/// Right-hand side of a binding
#[derive(Debug, Clone, PartialEq)]
pub enum BindingValue {
    Expr(Expr),
    Block(Block),
}

impl BindingValue {
    pub fn span(&self) -> Span {
        match self {
            BindingValue::Expr(e) => e.span,
            BindingValue::Block(b) => b.span,
        }
    }

    /// Visit every identifier that is read by this binding
    pub fn visit_identifiers(&self, f: &mut dyn FnMut(&str)) {
        match self {
            BindingValue::Expr(e) => e.visit_identifiers(f),
            BindingValue::Block(b) => b.visit_identifiers(f),
        }
    }
}

// =============================================================================
// Scripts and statements
// =============================================================================

/// A script file: a list of function declarations
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub functions: Vec<FunctionDecl>,
    pub span: Span,
}

/// `function name(params) { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Identifier,
    pub params: Vec<Identifier>,
    pub body: Block,
    pub span: Span,
}

/// Statement block
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn visit_identifiers(&self, f: &mut dyn FnMut(&str)) {
        for stmt in &self.statements {
            stmt.visit_identifiers(f);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `var x = e;` (also `let` and `const`)
    Var { name: Identifier, init: Option<Expr> },
    /// `x = e;`, `x += e;`, `x -= e;`
    Assign {
        name: Identifier,
        op: AssignOp,
        value: Expr,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    Return(Option<Expr>),
    Block(Block),
    Expr(Expr),
    Empty,
}

impl Stmt {
    pub fn visit_identifiers(&self, f: &mut dyn FnMut(&str)) {
        match &self.kind {
            StmtKind::Var { init, .. } => {
                if let Some(init) = init {
                    init.visit_identifiers(f);
                }
            }
            StmtKind::Assign { name, value, .. } => {
                f(&name.node);
                value.visit_identifiers(f);
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.visit_identifiers(f);
                then_branch.visit_identifiers(f);
                if let Some(e) = else_branch {
                    e.visit_identifiers(f);
                }
            }
            StmtKind::Return(Some(e)) | StmtKind::Expr(e) => e.visit_identifiers(f),
            StmtKind::Block(b) => b.visit_identifiers(f),
            StmtKind::Return(None) | StmtKind::Empty => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The `undefined` literal, used for declarations without an initializer
    pub fn undefined(span: Span) -> Self {
        Self {
            kind: ExprKind::Undefined,
            span,
        }
    }

    /// Visit every free identifier read by this expression.
    ///
    /// Member names after `.` are not identifiers and are not visited.
    pub fn visit_identifiers(&self, f: &mut dyn FnMut(&str)) {
        match &self.kind {
            ExprKind::Identifier(name) => f(name),
            ExprKind::Array(items) => items.iter().for_each(|e| e.visit_identifiers(f)),
            ExprKind::Object(entries) => entries.iter().for_each(|(_, e)| e.visit_identifiers(f)),
            ExprKind::Member { base, .. } => base.visit_identifiers(f),
            ExprKind::Index { base, index } => {
                base.visit_identifiers(f);
                index.visit_identifiers(f);
            }
            ExprKind::Call { callee, args } => {
                callee.visit_identifiers(f);
                args.iter().for_each(|e| e.visit_identifiers(f));
            }
            ExprKind::Unary { operand, .. } => operand.visit_identifiers(f),
            ExprKind::Binary { left, right, .. } => {
                left.visit_identifiers(f);
                right.visit_identifiers(f);
            }
            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                condition.visit_identifiers(f);
                then_expr.visit_identifiers(f);
                else_expr.visit_identifiers(f);
            }
            ExprKind::Function { body, .. } => match body {
                FunctionBody::Expr(e) => e.visit_identifiers(f),
                FunctionBody::Block(b) => b.visit_identifiers(f),
            },
            ExprKind::Undefined
            | ExprKind::Null
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::String(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Identifier(String),
    Member {
        base: Box<Expr>,
        member: Identifier,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Arrow function or anonymous `function`
    Function {
        params: Vec<Identifier>,
        body: FunctionBody,
    },
}

/// Body of a function expression
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Expr(Box<Expr>),
    Block(Block),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Operator precedence (higher binds tighter)
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 0,
            BinaryOp::And => 1,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::StrictEq | BinaryOp::StrictNe => 2,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNe => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}
