//! Abstract Syntax Tree for `.fpp` parser descriptions.

use crate::ir::{BinOp, Direction, StructKind};

/// Root of a description: declarations in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Description {
    pub declarations: Vec<Declaration>,
}

impl Description {
    pub fn parsers(&self) -> impl Iterator<Item = &ParserDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Parser(p) => Some(p),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Enum(EnumDecl),
    Typedef(TypedefDecl),
    Struct(StructDecl),
    Parser(ParserDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedefDecl {
    pub name: String,
    pub ty: TypeRef,
}

/// `struct`, `header` or `header_union`.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub kind: StructKind,
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

/// `name: type;`, used for struct members and parser locals.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Bit(u32),
    Int(u32),
    Varbit(u32),
    Bool,
    Error,
    PacketIn,
    Named(String),
    /// Header stack `T[n]`.
    Stack(Box<TypeRef>, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub direction: Direction,
    pub ty: TypeRef,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParserDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub locals: Vec<FieldDecl>,
    pub states: Vec<StateDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateDecl {
    pub name: String,
    pub statements: Vec<Statement>,
    pub transition: Option<Transition>,
}

/// Packet method calls; `object` is the packet parameter they are called on.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Extract { object: String, args: Vec<Expression> },
    Lookahead { object: String, ty: TypeRef },
    Advance { object: String, amount: Expression },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Number { value: u64, width: Option<u32> },
    /// Dotted name, e.g. `headers.ipv4.ihl`.
    Path(Vec<String>),
    Lookahead { object: String, ty: TypeRef },
    Length { object: String },
    Binary {
        op: BinOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Goto(String),
    Select {
        keys: Vec<Expression>,
        cases: Vec<SelectCase>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectCase {
    pub keyset: KeysetExpr,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeysetExpr {
    Default,
    Value(Expression),
    Mask { value: Expression, mask: Expression },
    Tuple(Vec<KeysetExpr>),
}
