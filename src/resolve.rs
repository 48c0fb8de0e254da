//! Name resolution: AST to IR.
//!
//! Types must be declared before use. Every occurrence of a builtin type (`bit<8>`,
//! `bool`, ...) gets its own [`TypeId`]; named types resolve to the id of their
//! declaration.

use crate::ast::{self, Declaration, Description, Expression, KeysetExpr, TypeRef};
use crate::ir::{
    Expr, IrCase, IrField, IrState, IrStatement, IrStruct, IrTransition, IrType, Keyset, Local,
    Param, Parser, Program, TypeArena, TypeId, ACCEPT, REJECT,
};
use crate::model::{ERROR_CODES, LENGTH_PARAM, OUT_PARAM, PACKET_PARAM, RESERVED_PREFIX};
use std::collections::{HashMap, HashSet};

/// Resolve a parsed description into a program.
pub fn resolve(description: &Description) -> Result<Program, String> {
    let mut r = Resolver::default();
    let mut parser = None;
    for decl in &description.declarations {
        match decl {
            Declaration::Enum(e) => {
                check_unique(&e.members, &format!("enum {}", e.name))?;
                r.declare_members(&e.name, &e.members)?;
                let id = r.types.alloc(IrType::Enum {
                    name: e.name.clone(),
                    members: e.members.clone(),
                });
                r.declare(&e.name, id)?;
            }
            Declaration::Typedef(t) => {
                let target = r.type_ref(&t.ty)?;
                let id = r.types.alloc(IrType::Typedef {
                    name: t.name.clone(),
                    target,
                });
                r.declare(&t.name, id)?;
            }
            Declaration::Struct(s) => {
                let names: Vec<String> = s.fields.iter().map(|f| f.name.clone()).collect();
                check_unique(&names, &s.name)?;
                let fields = s
                    .fields
                    .iter()
                    .map(|f| {
                        Ok(IrField {
                            name: f.name.clone(),
                            ty: r.type_ref(&f.ty)?,
                        })
                    })
                    .collect::<Result<Vec<_>, String>>()?;
                let id = r.types.alloc(IrType::Struct(IrStruct {
                    kind: s.kind,
                    name: s.name.clone(),
                    fields,
                }));
                r.declare(&s.name, id)?;
            }
            Declaration::Parser(p) => {
                if parser.is_some() {
                    return Err(format!("parser {}: only one parser may be declared", p.name));
                }
                parser = Some(r.parser(p)?);
            }
        }
    }
    Ok(Program {
        types: r.types,
        parser,
    })
}

/// Reject names in the prefix the generated code declares its own names in.
fn check_unreserved(name: &str, owner: &str) -> Result<(), String> {
    if name.starts_with(RESERVED_PREFIX) {
        return Err(format!(
            "{}: {} uses the reserved prefix {}",
            owner, name, RESERVED_PREFIX
        ));
    }
    Ok(())
}

fn check_unique(names: &[String], owner: &str) -> Result<(), String> {
    let mut seen = HashSet::new();
    for n in names {
        if !seen.insert(n.as_str()) {
            return Err(format!("{}: duplicate member {}", owner, n));
        }
    }
    Ok(())
}

#[derive(Default)]
struct Resolver {
    types: TypeArena,
    named: HashMap<String, TypeId>,
    /// Enum members share one C namespace; each maps to its enum.
    members: HashMap<String, String>,
}

impl Resolver {
    fn declare_members(&mut self, owner: &str, members: &[String]) -> Result<(), String> {
        for m in members {
            check_unreserved(m, &format!("enum {}", owner))?;
            if ERROR_CODES.contains(&m.as_str()) {
                return Err(format!("enum {}: member {} is a parser status code", owner, m));
            }
            if let Some(other) = self.members.insert(m.clone(), owner.to_string()) {
                return Err(format!(
                    "enum {}: member {} is already declared by enum {}",
                    owner, m, other
                ));
            }
        }
        Ok(())
    }

    fn declare(&mut self, name: &str, id: TypeId) -> Result<(), String> {
        if self.named.insert(name.to_string(), id).is_some() {
            return Err(format!("duplicate type {}", name));
        }
        Ok(())
    }

    fn type_ref(&mut self, ty: &TypeRef) -> Result<TypeId, String> {
        let node = match ty {
            TypeRef::Named(name) => {
                return self
                    .named
                    .get(name)
                    .copied()
                    .ok_or_else(|| format!("unknown type {}", name))
            }
            TypeRef::Bit(w) => IrType::Bits { width: *w, signed: false },
            TypeRef::Int(w) => IrType::Bits { width: *w, signed: true },
            TypeRef::Varbit(w) => IrType::Varbit { max_width: *w },
            TypeRef::Bool => IrType::Bool,
            TypeRef::Error => IrType::Error,
            TypeRef::PacketIn => IrType::PacketIn,
            TypeRef::Stack(element, size) => IrType::Stack {
                element: self.type_ref(element)?,
                size: *size,
            },
        };
        Ok(self.types.alloc(node))
    }

    fn parser(&mut self, p: &ast::ParserDecl) -> Result<Parser, String> {
        let params = p
            .params
            .iter()
            .map(|param| {
                Ok(Param {
                    name: param.name.clone(),
                    direction: param.direction,
                    ty: self.type_ref(&param.ty)?,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;
        let packets: HashSet<&str> = p
            .params
            .iter()
            .filter(|param| param.ty == TypeRef::PacketIn)
            .map(|param| param.name.as_str())
            .collect();

        let locals = p
            .locals
            .iter()
            .map(|l| {
                check_unreserved(&l.name, &format!("parser {}", p.name))?;
                if [PACKET_PARAM, LENGTH_PARAM, OUT_PARAM].contains(&l.name.as_str()) {
                    return Err(format!(
                        "parser {}: local {} is a parameter of the generated function",
                        p.name, l.name
                    ));
                }
                Ok(Local {
                    name: l.name.clone(),
                    ty: self.type_ref(&l.ty)?,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        let names: Vec<String> = p.states.iter().map(|s| s.name.clone()).collect();
        check_unique(&names, &format!("parser {}", p.name))?;
        for name in &names {
            if name == ACCEPT || name == REJECT {
                return Err(format!("parser {}: state {} is built in", p.name, name));
            }
            check_unreserved(name, &format!("parser {}", p.name))?;
        }

        let mut states = Vec::with_capacity(p.states.len());
        for s in &p.states {
            let mut components = Vec::with_capacity(s.statements.len());
            for stmt in &s.statements {
                let (object, component) = match stmt {
                    ast::Statement::Extract { object, args } => (
                        object,
                        IrStatement::Extract(
                            args.iter()
                                .map(|a| self.expr(a))
                                .collect::<Result<Vec<_>, _>>()?,
                        ),
                    ),
                    ast::Statement::Lookahead { object, ty } => {
                        (object, IrStatement::Lookahead(Some(self.type_ref(ty)?)))
                    }
                    ast::Statement::Advance { object, amount } => {
                        (object, IrStatement::Advance(self.expr(amount)?))
                    }
                };
                if !packets.contains(object.as_str()) {
                    return Err(format!(
                        "state {}: {} is not a packet_in parameter",
                        s.name, object
                    ));
                }
                components.push(component);
            }
            let select = s.transition.as_ref().map(|t| self.transition(t)).transpose()?;
            states.push(IrState {
                name: s.name.clone(),
                components,
                select,
            });
        }

        Ok(Parser {
            name: p.name.clone(),
            params,
            locals,
            states,
        })
    }

    fn transition(&mut self, t: &ast::Transition) -> Result<IrTransition, String> {
        match t {
            ast::Transition::Goto(target) => Ok(IrTransition::Goto(target.clone())),
            ast::Transition::Select { keys, cases } => Ok(IrTransition::Select {
                keys: keys.iter().map(|k| self.expr(k)).collect::<Result<_, _>>()?,
                cases: cases
                    .iter()
                    .map(|c| {
                        Ok(IrCase {
                            keyset: self.keyset(&c.keyset)?,
                            state: c.target.clone(),
                        })
                    })
                    .collect::<Result<_, String>>()?,
            }),
        }
    }

    fn keyset(&mut self, k: &KeysetExpr) -> Result<Keyset, String> {
        Ok(match k {
            KeysetExpr::Default => Keyset::Default,
            KeysetExpr::Value(e) => Keyset::Value(self.expr(e)?),
            KeysetExpr::Mask { value, mask } => Keyset::Mask {
                value: self.expr(value)?,
                mask: self.expr(mask)?,
            },
            KeysetExpr::Tuple(items) => Keyset::Tuple(
                items
                    .iter()
                    .map(|i| self.keyset(i))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    fn expr(&mut self, e: &Expression) -> Result<Expr, String> {
        Ok(match e {
            Expression::Number { value, width } => Expr::Constant {
                value: *value,
                width: *width,
            },
            Expression::Path(segments) => {
                let (first, rest) = segments
                    .split_first()
                    .ok_or_else(|| "empty path".to_string())?;
                rest.iter()
                    .fold(Expr::path(first.as_str()), |base, m| base.member(m.as_str()))
            }
            Expression::Lookahead { ty, .. } => Expr::Lookahead(Some(self.type_ref(ty)?)),
            Expression::Length { .. } => Expr::PacketLength,
            Expression::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(self.expr(lhs)?),
                rhs: Box::new(self.expr(rhs)?),
            },
        })
    }
}
