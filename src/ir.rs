//! Resolved intermediate representation consumed by the code generator.
//!
//! Types live in a [`TypeArena`] and are referred to by [`TypeId`]; two occurrences of
//! `bit<8>` in the source are two distinct nodes, and the type factory memoizes on that
//! identity. Names inside states (header instances, locals, state targets) are plain
//! strings; the generator checks them against the parser it is compiling.

use std::fmt;

/// Name of the builtin accepting state.
pub const ACCEPT: &str = "accept";
/// Name of the builtin rejecting state.
pub const REJECT: &str = "reject";

/// Identity of a type node in a [`TypeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    Struct,
    Header,
    HeaderUnion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrField {
    pub name: String,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrStruct {
    pub kind: StructKind,
    pub name: String,
    pub fields: Vec<IrField>,
}

/// One type node.
#[derive(Debug, Clone, PartialEq)]
pub enum IrType {
    Bool,
    Bits { width: u32, signed: bool },
    /// Variable-length bit string; never has a fixed width.
    Varbit { max_width: u32 },
    Struct(IrStruct),
    Typedef { name: String, target: TypeId },
    Enum { name: String, members: Vec<String> },
    /// Header stack `T[size]`.
    Stack { element: TypeId, size: u32 },
    /// The builtin `error` type.
    Error,
    /// The builtin packet input extern.
    PacketIn,
}

/// Arena of type nodes; [`TypeId`]s index into it.
#[derive(Debug, Clone, Default)]
pub struct TypeArena {
    types: Vec<IrType>,
}

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its identity. Identical nodes added twice get two ids.
    pub fn alloc(&mut self, ty: IrType) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    pub fn bits(&mut self, width: u32) -> TypeId {
        self.alloc(IrType::Bits { width, signed: false })
    }

    pub fn get(&self, id: TypeId) -> &IrType {
        &self.types[id.index()]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// The declaration of a named struct, enum or typedef.
    pub fn named(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| match t {
                IrType::Struct(s) => s.name == name,
                IrType::Enum { name: n, .. } | IrType::Typedef { name: n, .. } => n == name,
                _ => false,
            })
            .map(|i| TypeId(i as u32))
    }

    /// Source-level spelling of a type, used in generated comments and diagnostics.
    pub fn describe(&self, id: TypeId) -> String {
        match self.get(id) {
            IrType::Bool => "bool".to_string(),
            IrType::Bits { width, signed: false } => format!("bit<{}>", width),
            IrType::Bits { width, signed: true } => format!("int<{}>", width),
            IrType::Varbit { max_width } => format!("varbit<{}>", max_width),
            IrType::Struct(s) => s.name.clone(),
            IrType::Typedef { name, .. } => name.clone(),
            IrType::Enum { name, .. } => name.clone(),
            IrType::Stack { element, size } => format!("{}[{}]", self.describe(*element), size),
            IrType::Error => "error".to_string(),
            IrType::PacketIn => "packet_in".to_string(),
        }
    }

    /// Follow typedefs down to the first non-alias node.
    pub fn canonical(&self, mut id: TypeId) -> TypeId {
        while let IrType::Typedef { target, .. } = self.get(id) {
            id = *target;
        }
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub direction: Direction,
    pub ty: TypeId,
}

/// A variable declared inside the parser body.
#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub name: String,
    pub ty: TypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Shl,
    Shr,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant { value: u64, width: Option<u32> },
    Path(String),
    Member { base: Box<Expr>, member: String },
    /// `packet.lookahead<T>()`; `None` when the front-end could not supply a type.
    Lookahead(Option<TypeId>),
    /// `packet.length()`.
    PacketLength,
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    pub fn constant(value: u64) -> Self {
        Expr::Constant { value, width: None }
    }

    pub fn path(name: impl Into<String>) -> Self {
        Expr::Path(name.into())
    }

    pub fn member(self, member: impl Into<String>) -> Self {
        Expr::Member {
            base: Box::new(self),
            member: member.into(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { value, width: Some(w) } => write!(f, "{}w{}", w, value),
            Expr::Constant { value, width: None } => write!(f, "{}", value),
            Expr::Path(name) => f.write_str(name),
            Expr::Member { base, member } => write!(f, "{}.{}", base, member),
            Expr::Lookahead(_) => f.write_str("lookahead()"),
            Expr::PacketLength => f.write_str("length()"),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrStatement {
    /// `packet.extract(args)`; only the single-argument form is supported.
    Extract(Vec<Expr>),
    Lookahead(Option<TypeId>),
    Advance(Expr),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Keyset {
    Default,
    Value(Expr),
    Mask { value: Expr, mask: Expr },
    Tuple(Vec<Keyset>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrCase {
    pub keyset: Keyset,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrTransition {
    Goto(String),
    Select { keys: Vec<Expr>, cases: Vec<IrCase> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrState {
    pub name: String,
    pub components: Vec<IrStatement>,
    pub select: Option<IrTransition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parser {
    pub name: String,
    pub params: Vec<Param>,
    pub locals: Vec<Local>,
    pub states: Vec<IrState>,
}

/// A whole resolved program: its types and at most one parser.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub types: TypeArena,
    pub parser: Option<Parser>,
}
