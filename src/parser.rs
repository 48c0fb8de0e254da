//! Parse `.fpp` source into AST using PEST.

use crate::ast::*;
use crate::ir::{BinOp, Direction, StructKind};
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct DescriptionParser;

/// Parse a description into AST.
pub fn parse(source: &str) -> Result<Description, String> {
    let pairs = DescriptionParser::parse(Rule::description, source)
        .map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    build_description(pair)
}

fn build_description(pair: Pair<Rule>) -> Result<Description, String> {
    let mut declarations = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::enum_decl => declarations.push(Declaration::Enum(build_enum(inner)?)),
            Rule::typedef_decl => declarations.push(Declaration::Typedef(build_typedef(inner)?)),
            Rule::struct_decl => declarations.push(Declaration::Struct(build_struct(inner)?)),
            Rule::parser_decl => declarations.push(Declaration::Parser(build_parser(inner)?)),
            _ => {}
        }
    }
    Ok(Description { declarations })
}

fn build_enum(pair: Pair<Rule>) -> Result<EnumDecl, String> {
    let mut idents = pair.into_inner().map(|p| p.as_str().to_string());
    let name = idents.next().ok_or("enum: missing name")?;
    let members: Vec<String> = idents.collect();
    if members.is_empty() {
        return Err(format!("enum {}: no members", name));
    }
    Ok(EnumDecl { name, members })
}

fn build_typedef(pair: Pair<Rule>) -> Result<TypedefDecl, String> {
    let mut it = pair.into_inner();
    let ty = build_type_ref(it.next().ok_or("typedef: missing type")?)?;
    let name = it.next().ok_or("typedef: missing name")?.as_str().to_string();
    Ok(TypedefDecl { name, ty })
}

fn build_struct(pair: Pair<Rule>) -> Result<StructDecl, String> {
    let mut it = pair.into_inner();
    let kind = match it.next().ok_or("struct: missing kind")?.as_str() {
        "header" => StructKind::Header,
        "header_union" => StructKind::HeaderUnion,
        _ => StructKind::Struct,
    };
    let name = it.next().ok_or("struct: missing name")?.as_str().to_string();
    let fields = it.map(build_field).collect::<Result<Vec<_>, _>>()?;
    Ok(StructDecl { kind, name, fields })
}

/// `name: type;` for struct members and parser locals.
fn build_field(pair: Pair<Rule>) -> Result<FieldDecl, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("field: missing name")?.as_str().to_string();
    let ty = build_type_ref(it.next().ok_or("field: missing type")?)?;
    Ok(FieldDecl { name, ty })
}

fn build_type_ref(pair: Pair<Rule>) -> Result<TypeRef, String> {
    let mut it = pair.into_inner();
    let base = it.next().ok_or("type: missing base type")?;
    let ty = match base.as_rule() {
        Rule::bool_type => TypeRef::Bool,
        Rule::error_type => TypeRef::Error,
        Rule::packet_in_type => TypeRef::PacketIn,
        Rule::named_type => TypeRef::Named(base.as_str().trim().to_string()),
        Rule::bit_type | Rule::int_type | Rule::varbit_type => {
            let rule = base.as_rule();
            let width_pair = base.into_inner().next().ok_or("type: missing width")?;
            let width = parse_u32(width_pair.as_str())?;
            match rule {
                Rule::bit_type => TypeRef::Bit(width),
                Rule::int_type => TypeRef::Int(width),
                _ => TypeRef::Varbit(width),
            }
        }
        other => return Err(format!("unexpected type rule: {:?}", other)),
    };
    match it.next() {
        Some(size) => {
            let n = size.into_inner().next().ok_or("stack: missing size")?;
            Ok(TypeRef::Stack(Box::new(ty), parse_u32(n.as_str())?))
        }
        None => Ok(ty),
    }
}

fn build_parser(pair: Pair<Rule>) -> Result<ParserDecl, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("parser: missing name")?.as_str().to_string();
    let mut params = Vec::new();
    let mut locals = Vec::new();
    let mut states = Vec::new();
    for inner in it {
        match inner.as_rule() {
            Rule::param => params.push(build_param(inner)?),
            Rule::local_decl => locals.push(build_field(inner)?),
            Rule::state_decl => states.push(build_state(inner)?),
            _ => {}
        }
    }
    Ok(ParserDecl {
        name,
        params,
        locals,
        states,
    })
}

fn build_param(pair: Pair<Rule>) -> Result<ParamDecl, String> {
    let mut direction = Direction::None;
    let mut ty = None;
    let mut name = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::direction => {
                direction = match inner.as_str() {
                    "in" => Direction::In,
                    "out" => Direction::Out,
                    _ => Direction::InOut,
                }
            }
            Rule::type_ref => ty = Some(build_type_ref(inner)?),
            Rule::ident => name = Some(inner.as_str().to_string()),
            _ => {}
        }
    }
    Ok(ParamDecl {
        direction,
        ty: ty.ok_or("param: missing type")?,
        name: name.ok_or("param: missing name")?,
    })
}

fn build_state(pair: Pair<Rule>) -> Result<StateDecl, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("state: missing name")?.as_str().to_string();
    let mut statements = Vec::new();
    let mut transition = None;
    for inner in it {
        match inner.as_rule() {
            Rule::extract_stmt => {
                let mut parts = inner.into_inner();
                let object = parts.next().ok_or("extract: missing object")?.as_str().to_string();
                let args = parts.map(build_expr).collect::<Result<Vec<_>, _>>()?;
                statements.push(Statement::Extract { object, args });
            }
            Rule::lookahead_stmt => {
                let call = inner.into_inner().next().ok_or("lookahead: missing call")?;
                let (object, ty) = build_lookahead(call)?;
                statements.push(Statement::Lookahead { object, ty });
            }
            Rule::advance_stmt => {
                let mut parts = inner.into_inner();
                let object = parts.next().ok_or("advance: missing object")?.as_str().to_string();
                let amount = build_expr(parts.next().ok_or("advance: missing amount")?)?;
                statements.push(Statement::Advance { object, amount });
            }
            Rule::transition_stmt => transition = Some(build_transition(inner)?),
            _ => {}
        }
    }
    Ok(StateDecl {
        name,
        statements,
        transition,
    })
}

fn build_lookahead(pair: Pair<Rule>) -> Result<(String, TypeRef), String> {
    let mut it = pair.into_inner();
    let object = it.next().ok_or("lookahead: missing object")?.as_str().to_string();
    let ty = build_type_ref(it.next().ok_or("lookahead: missing type")?)?;
    Ok((object, ty))
}

fn build_transition(pair: Pair<Rule>) -> Result<Transition, String> {
    let inner = pair.into_inner().next().ok_or("transition: missing target")?;
    match inner.as_rule() {
        Rule::goto_target => Ok(Transition::Goto(inner.as_str().trim().to_string())),
        Rule::select_expr => {
            let mut keys = Vec::new();
            let mut cases = Vec::new();
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::expr => keys.push(build_expr(part)?),
                    Rule::select_case => {
                        let mut it = part.into_inner();
                        let keyset = build_keyset(it.next().ok_or("case: missing keyset")?)?;
                        let target = it.next().ok_or("case: missing state")?.as_str().to_string();
                        cases.push(SelectCase { keyset, target });
                    }
                    _ => {}
                }
            }
            Ok(Transition::Select { keys, cases })
        }
        other => Err(format!("unexpected transition rule: {:?}", other)),
    }
}

fn build_keyset(pair: Pair<Rule>) -> Result<KeysetExpr, String> {
    match pair.as_rule() {
        Rule::default_keyset => Ok(KeysetExpr::Default),
        Rule::value_keyset => {
            let e = pair.into_inner().next().ok_or("keyset: missing value")?;
            Ok(KeysetExpr::Value(build_expr(e)?))
        }
        Rule::mask_keyset => {
            let mut it = pair.into_inner();
            let value = build_expr(it.next().ok_or("mask: missing value")?)?;
            let mask = build_expr(it.next().ok_or("mask: missing mask")?)?;
            Ok(KeysetExpr::Mask { value, mask })
        }
        Rule::tuple_keyset => Ok(KeysetExpr::Tuple(
            pair.into_inner().map(build_keyset).collect::<Result<Vec<_>, _>>()?,
        )),
        other => Err(format!("unexpected keyset rule: {:?}", other)),
    }
}

fn pratt() -> PrattParser<Rule> {
    PrattParser::new()
        .op(Op::infix(Rule::or, Assoc::Left))
        .op(Op::infix(Rule::and, Assoc::Left))
        .op(Op::infix(Rule::shl, Assoc::Left) | Op::infix(Rule::shr, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left))
}

fn build_expr(pair: Pair<Rule>) -> Result<Expression, String> {
    pratt()
        .map_primary(build_primary)
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::add => BinOp::Add,
                Rule::sub => BinOp::Sub,
                Rule::mul => BinOp::Mul,
                Rule::shl => BinOp::Shl,
                Rule::shr => BinOp::Shr,
                Rule::and => BinOp::And,
                Rule::or => BinOp::Or,
                other => return Err(format!("unexpected operator: {:?}", other)),
            };
            Ok(Expression::Binary {
                op,
                lhs: Box::new(lhs?),
                rhs: Box::new(rhs?),
            })
        })
        .parse(pair.into_inner())
}

fn build_primary(pair: Pair<Rule>) -> Result<Expression, String> {
    match pair.as_rule() {
        Rule::number => {
            let (value, width) = parse_number(pair.as_str())?;
            Ok(Expression::Number { value, width })
        }
        Rule::member_path => Ok(Expression::Path(
            pair.into_inner().map(|p| p.as_str().to_string()).collect(),
        )),
        Rule::lookahead_call => {
            let (object, ty) = build_lookahead(pair)?;
            Ok(Expression::Lookahead { object, ty })
        }
        Rule::length_call => {
            let object = pair.into_inner().next().ok_or("length: missing object")?;
            Ok(Expression::Length {
                object: object.as_str().to_string(),
            })
        }
        Rule::expr => build_expr(pair),
        other => Err(format!("unexpected expression rule: {:?}", other)),
    }
}

/// Integer literal: decimal, `0x` hex, optionally prefixed with a width (`16w0x0800`).
pub fn parse_number(s: &str) -> Result<(u64, Option<u32>), String> {
    let cleaned: String = s.chars().filter(|c| *c != '_').collect();
    let (width, digits) = match cleaned.find(['w', 's']) {
        Some(i) => (Some(parse_u32(&cleaned[..i])?), &cleaned[i + 1..]),
        None => (None, cleaned.as_str()),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => digits.parse::<u64>(),
    }
    .map_err(|e| format!("invalid number {}: {}", s, e))?;
    Ok((value, width))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    s.trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid width {}: {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers() {
        assert_eq!(parse_number("42"), Ok((42, None)));
        assert_eq!(parse_number("0x0800"), Ok((0x800, None)));
        assert_eq!(parse_number("16w0x0800"), Ok((0x800, Some(16))));
        assert_eq!(parse_number("8w255"), Ok((255, Some(8))));
        assert_eq!(parse_number("1_000"), Ok((1000, None)));
        assert!(parse_number("0xfffffffffffffffff").is_err());
    }

    #[test]
    fn precedence_follows_c() {
        let d = parse(
            "parser p(packet_in pkt, out h_t h) { state start { pkt.advance(1 + 2 * 3 << 1); transition accept; } }",
        )
        .expect("parse");
        let p = d.parsers().next().expect("parser");
        let Statement::Advance { amount, .. } = &p.states[0].statements[0] else {
            panic!("expected advance");
        };
        let num = |v| Box::new(Expression::Number { value: v, width: None });
        assert_eq!(
            *amount,
            Expression::Binary {
                op: BinOp::Shl,
                lhs: Box::new(Expression::Binary {
                    op: BinOp::Add,
                    lhs: num(1),
                    rhs: Box::new(Expression::Binary { op: BinOp::Mul, lhs: num(2), rhs: num(3) }),
                }),
                rhs: num(1),
            }
        );
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert!(parse("header state { a: bit<8>; }").is_err());
        assert!(parse("header headers { boolean: bool; }").is_ok());
    }
}
