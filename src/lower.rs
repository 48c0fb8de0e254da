//! Lowering of resolved IR states into emittable [`ParserState`]s.
//!
//! Names are looked up in a [`Scope`] built once per parser: the packet parameter, the
//! output struct whose header fields become allocated instances, the parser locals and
//! the set of declared states. Expressions are rendered to C as they are lowered.

use crate::error::CompileError;
use crate::extract::{check_lookahead, CodeExpr};
use crate::ir::{BinOp, Expr, IrState, IrStatement, IrTransition, Keyset, ACCEPT, REJECT};
use crate::model::{instance_var, LENGTH_PARAM};
use crate::state::{HeaderDest, ParserState, SelectCase, Statement, Target, Transition};
use crate::types::{FieldType, HasWidth, TypeFactory};
use std::collections::HashSet;
use std::rc::Rc;

/// Names visible inside the states of one parser.
pub struct Scope {
    /// Name of the packet input parameter.
    pub packet: String,
    /// Name of the output parameter.
    pub headers: String,
    /// Type of the output parameter; each header field is an output instance.
    pub outputs: Rc<FieldType>,
    pub locals: Vec<(String, Rc<FieldType>)>,
    pub states: HashSet<String>,
}

impl Scope {
    fn local(&self, name: &str) -> Option<&Rc<FieldType>> {
        self.locals.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    fn target(&self, state: &str, name: &str) -> Result<Target, CompileError> {
        if name == ACCEPT || name == REJECT {
            Ok(Target::Terminal)
        } else if self.states.contains(name) {
            Ok(Target::State(name.to_string()))
        } else {
            Err(CompileError::UnknownState {
                state: state.to_string(),
                target: name.to_string(),
            })
        }
    }
}

/// A rendered expression.
#[derive(Debug, Clone, Default)]
struct Value {
    code: CodeExpr,
    ty: Option<Rc<FieldType>>,
    constant: Option<u64>,
    /// True for storage the parser may extract into.
    assignable: bool,
}

enum Place {
    /// A header field of the output struct.
    Instance { name: String, header: Rc<FieldType> },
    Value(Value),
}

pub fn lower_state(
    scope: &Scope,
    factory: &mut TypeFactory<'_>,
    state: &IrState,
) -> Result<ParserState, CompileError> {
    let mut lowering = Lowering {
        scope,
        factory,
        state: &state.name,
    };
    let mut out = ParserState::new(state.name.as_str());
    for component in &state.components {
        lowering.statement(component, &mut out.statements)?;
    }
    out.transition = state
        .select
        .as_ref()
        .map(|t| lowering.transition(t))
        .transpose()?;
    Ok(out)
}

struct Lowering<'s, 'f, 'a> {
    scope: &'s Scope,
    factory: &'f mut TypeFactory<'a>,
    state: &'s str,
}

impl Lowering<'_, '_, '_> {
    fn statement(
        &mut self,
        component: &IrStatement,
        out: &mut Vec<Statement>,
    ) -> Result<(), CompileError> {
        match component {
            IrStatement::Comment(text) => out.push(Statement::Comment(text.clone())),
            IrStatement::Extract(args) => {
                let [arg] = args.as_slice() else {
                    return Err(self.unsupported_extract(
                        &format!("{} arguments", args.len()),
                        "only the single-argument form of extract is supported",
                    ));
                };
                out.push(Statement::Comment(format!(
                    "{}.extract({})",
                    self.scope.packet, arg
                )));
                out.push(self.extract(arg)?);
            }
            IrStatement::Lookahead(ty) => {
                let ty = match ty {
                    Some(id) => Some(self.factory.create(*id)?),
                    None => None,
                };
                let ty = check_lookahead(self.state, ty)?;
                out.push(Statement::Comment(format!(
                    "{}.lookahead<{}>()",
                    self.scope.packet, ty
                )));
                out.push(Statement::Lookahead(ty));
            }
            IrStatement::Advance(amount) => {
                out.push(Statement::Comment(format!(
                    "{}.advance({})",
                    self.scope.packet, amount
                )));
                let value = self.value(amount)?;
                out.push(Statement::Advance {
                    amount: value.code,
                    bits: value.constant,
                });
            }
        }
        Ok(())
    }

    fn extract(&mut self, arg: &Expr) -> Result<Statement, CompileError> {
        match self.place(arg)? {
            Place::Instance { name, header } => {
                if header.as_header().is_none() {
                    return Err(self.unsupported_extract(
                        &arg.to_string(),
                        &format!("{} is not a header", header),
                    ));
                }
                Ok(Statement::ExtractHeader {
                    dest: HeaderDest::Output { instance: name },
                    header,
                })
            }
            Place::Value(v) => {
                let (ty, dest) = match (v.ty, v.code.plain()) {
                    (Some(ty), Some(dest)) if v.assignable => (ty, dest),
                    _ => {
                        return Err(self.unsupported_extract(
                            &arg.to_string(),
                            "extract target must be a parser local",
                        ))
                    }
                };
                if ty.as_header().is_some() {
                    Ok(Statement::ExtractHeader {
                        dest: HeaderDest::Local { var: dest },
                        header: ty,
                    })
                } else if ty.as_struct().is_some() {
                    Err(self.unsupported_extract(&arg.to_string(), "only headers and scalars can be extracted"))
                } else {
                    Ok(Statement::ExtractField { dest, ty })
                }
            }
        }
    }

    fn transition(&mut self, transition: &IrTransition) -> Result<Transition, CompileError> {
        match transition {
            IrTransition::Goto(name) => Ok(Transition::Unconditional(self.scope.target(self.state, name)?)),
            IrTransition::Select { keys, cases } => {
                let [key] = keys.as_slice() else {
                    return Err(self.unsupported_select(format!(
                        "select on {} keys is not supported",
                        keys.len()
                    )));
                };
                let key = self.value(key)?;
                if let Some(ty) = &key.ty {
                    if !ty.is_machine_scalar() {
                        return Err(self.unsupported_select(format!(
                            "cannot select on {} ({} bits); selectors must be scalars of at most 32 bits",
                            ty,
                            ty.width_in_bits()
                        )));
                    }
                }

                let mut lowered = Vec::with_capacity(cases.len());
                let mut has_default = false;
                let mut seen = HashSet::new();
                for case in cases {
                    let label = self.keyset(&case.keyset)?;
                    let target = self.scope.target(self.state, &case.state)?;
                    match label {
                        None if has_default => {
                            return Err(CompileError::DuplicateDefault {
                                state: self.state.to_string(),
                            });
                        }
                        None => has_default = true,
                        // The first matching case wins; a repeated label can never be taken.
                        Some(value) if !seen.insert(value) => {
                            tracing::warn!(
                                state = self.state,
                                value,
                                target = target.label(),
                                "dropping unreachable select case"
                            );
                            continue;
                        }
                        Some(_) => {}
                    }
                    lowered.push(SelectCase {
                        value: label.map(literal),
                        target,
                    });
                }
                Ok(Transition::Select {
                    key: key.code,
                    cases: lowered,
                })
            }
        }
    }

    /// The constant a case matches, `None` for the default case.
    fn keyset(&mut self, keyset: &Keyset) -> Result<Option<u64>, CompileError> {
        match keyset {
            Keyset::Default => Ok(None),
            Keyset::Value(e) => match self.value(e)?.constant {
                Some(c) => Ok(Some(c)),
                None => Err(self.unsupported_select(format!("case label {} is not a constant", e))),
            },
            Keyset::Tuple(items) if items.len() == 1 => self.keyset(&items[0]),
            Keyset::Tuple(_) => Err(self.unsupported_select("tuple keysets are not supported".to_string())),
            Keyset::Mask { .. } => {
                Err(self.unsupported_select("masked keysets are not supported".to_string()))
            }
        }
    }

    fn value(&mut self, expr: &Expr) -> Result<Value, CompileError> {
        match self.place(expr)? {
            Place::Value(v) => Ok(v),
            Place::Instance { .. } => Err(self.unsupported_expression(expr, "a header is not a value")),
        }
    }

    fn place(&mut self, expr: &Expr) -> Result<Place, CompileError> {
        match expr {
            Expr::Constant { value, .. } => Ok(Place::Value(constant(*value))),
            Expr::Path(name) => {
                if let Some(ty) = self.scope.local(name) {
                    return Ok(Place::Value(Value {
                        code: CodeExpr::text(name.as_str()),
                        ty: Some(Rc::clone(ty)),
                        assignable: true,
                        ..Value::default()
                    }));
                }
                if *name == self.scope.packet || *name == self.scope.headers {
                    return Err(self.unsupported_expression(expr, "parameters cannot be used as values"));
                }
                Err(self.unresolved(name))
            }
            Expr::Member { base, member } => {
                if matches!(base.as_ref(), Expr::Path(p) if *p == self.scope.headers) {
                    let outputs = self.scope.outputs.as_struct().ok_or_else(|| {
                        self.unsupported_expression(expr, "output parameter is not a struct")
                    })?;
                    let field = outputs.field(member).ok_or_else(|| self.unresolved(&expr.to_string()))?;
                    return Ok(Place::Instance {
                        name: member.clone(),
                        header: Rc::clone(&field.ty),
                    });
                }
                let (mut code, ty, assignable) = match self.place(base)? {
                    Place::Instance { name, header } => {
                        (CodeExpr::text(format!("{}->", instance_var(&name))), header, false)
                    }
                    Place::Value(Value {
                        mut code,
                        ty: Some(ty),
                        assignable,
                        ..
                    }) => {
                        code.push_str(".");
                        (code, ty, assignable)
                    }
                    Place::Value(_) => {
                        return Err(self.unsupported_expression(expr, "member access on a value without fields"))
                    }
                };
                let st = ty
                    .as_struct()
                    .ok_or_else(|| self.unsupported_expression(expr, "member access on a scalar"))?;
                let field = st.field(member).ok_or_else(|| self.unresolved(&expr.to_string()))?;
                code.push_str(member);
                Ok(Place::Value(Value {
                    code,
                    ty: Some(Rc::clone(&field.ty)),
                    assignable,
                    ..Value::default()
                }))
            }
            Expr::Lookahead(ty) => {
                let ty = match ty {
                    Some(id) => Some(self.factory.create(*id)?),
                    None => None,
                };
                let ty = check_lookahead(self.state, ty)?;
                Ok(Place::Value(Value {
                    code: CodeExpr::lookahead(Rc::clone(&ty)),
                    ty: Some(ty),
                    ..Value::default()
                }))
            }
            Expr::PacketLength => Ok(Place::Value(Value {
                code: CodeExpr::text(LENGTH_PARAM),
                ..Value::default()
            })),
            Expr::Binary { op, lhs, rhs } => {
                let l = self.value(lhs)?;
                let r = self.value(rhs)?;
                let constant = match (l.constant, r.constant) {
                    (Some(a), Some(b)) => fold(*op, a, b),
                    _ => None,
                };
                let mut code = CodeExpr::text("(");
                code.append(l.code);
                code.push_str(&format!(" {} ", op.symbol()));
                code.append(r.code);
                code.push_str(")");
                Ok(Place::Value(Value {
                    code,
                    ty: None,
                    constant,
                    assignable: false,
                }))
            }
        }
    }

    fn unresolved(&self, name: &str) -> CompileError {
        CompileError::UnresolvedName {
            state: self.state.to_string(),
            name: name.to_string(),
        }
    }

    fn unsupported_select(&self, reason: String) -> CompileError {
        CompileError::UnsupportedSelect {
            state: self.state.to_string(),
            reason,
        }
    }

    fn unsupported_extract(&self, expr: &str, reason: &str) -> CompileError {
        CompileError::UnsupportedExtract {
            state: self.state.to_string(),
            expr: expr.to_string(),
            reason: reason.to_string(),
        }
    }

    fn unsupported_expression(&self, expr: &Expr, reason: &str) -> CompileError {
        CompileError::UnsupportedExpression {
            state: self.state.to_string(),
            expr: expr.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// C literal for `value`: decimal up to 9, hex above, `ULL` past 32 bits.
fn literal(value: u64) -> String {
    let mut text = if value > 9 {
        format!("{:#x}", value)
    } else {
        value.to_string()
    };
    if value > u64::from(u32::MAX) {
        text.push_str("ULL");
    }
    text
}

fn constant(value: u64) -> Value {
    Value {
        code: CodeExpr::text(literal(value)),
        constant: Some(value),
        ..Value::default()
    }
}

fn fold(op: BinOp, a: u64, b: u64) -> Option<u64> {
    match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::And => Some(a & b),
        BinOp::Or => Some(a | b),
        BinOp::Shl => u32::try_from(b).ok().and_then(|b| a.checked_shl(b)),
        BinOp::Shr => u32::try_from(b).ok().and_then(|b| a.checked_shr(b)),
    }
}
