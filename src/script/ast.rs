//! Abstract syntax tree for scripts.
//!
//! Function and class declarations are reference counted because runtime
//! values share them: every function value created from a declaration holds
//! the same `Rc<FunctionDecl>`, and rebinding a function after a reload
//! clones the handle rather than the tree.

use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr { expr: Expr, line: u32 },
    Assign {
        target: AssignTarget,
        value: Expr,
        line: u32,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        line: u32,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        line: u32,
    },
    Return { value: Option<Expr>, line: u32 },
    FunctionDef(Rc<FunctionDecl>),
    ClassDef(Rc<ClassDecl>),
    Import { path: Vec<String>, line: u32 },
    FromImport {
        path: Vec<String>,
        names: Vec<String>,
        line: u32,
    },
}

impl Stmt {
    pub fn line(&self) -> u32 {
        match self {
            Stmt::Expr { line, .. }
            | Stmt::Assign { line, .. }
            | Stmt::If { line, .. }
            | Stmt::While { line, .. }
            | Stmt::Return { line, .. }
            | Stmt::Import { line, .. }
            | Stmt::FromImport { line, .. } => *line,
            Stmt::FunctionDef(decl) => decl.line,
            Stmt::ClassDef(decl) => decl.line,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(String),
    Attribute { object: Expr, name: String },
    Index { object: Expr, index: Expr },
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub line: u32,
}

#[derive(Debug)]
pub struct ClassDecl {
    pub name: String,
    /// Base class expression, evaluated when the definition executes.
    pub base: Option<Expr>,
    pub methods: Vec<Rc<FunctionDecl>>,
    pub constants: Vec<(String, Expr)>,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    List(Vec<Expr>),
    Name(String),
    Attribute { object: Box<Expr>, name: String },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}
