//! Parser states and their translation into labeled C blocks.
//!
//! Every state becomes `name: { ... }` and always ends in a jump: to the next state, to
//! a `switch` over the select key, or to `reject`. The accept and reject states of the
//! source both map to the single terminal label, which returns the current status.

use crate::builder::CodeBuilder;
use crate::error::CompileError;
use crate::extract::{
    emit_advance, emit_bounds_check, extract_field, lookahead_expr, CodeExpr, EmitContext,
};
use crate::model::{
    discriminator, instance_var, END_LABEL, ERROR_VAR, LAST_NODE_VAR, NODE_TYPE, NODE_VAR,
    OFFSET_VAR, OUT_PARAM, REJECT_LABEL,
};
use crate::types::{FieldType, HasWidth};
use std::rc::Rc;

/// Where a transition goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    State(String),
    /// The terminal label, reached by both accept and reject.
    Terminal,
}

impl Target {
    pub fn label(&self) -> &str {
        match self {
            Target::State(name) => name,
            Target::Terminal => REJECT_LABEL,
        }
    }
}

/// Storage an extracted header is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderDest {
    /// A header instance of the output; allocated and linked into the result list.
    Output { instance: String },
    /// A header declared as a parser local.
    Local { var: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Extract a scalar into a parser local.
    ExtractField { dest: String, ty: Rc<FieldType> },
    ExtractHeader { dest: HeaderDest, header: Rc<FieldType> },
    Lookahead(Rc<FieldType>),
    /// Skip `amount` bits; `bits` holds the amount when it is a constant.
    Advance { amount: CodeExpr, bits: Option<u64> },
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectCase {
    /// `None` for the default case.
    pub value: Option<String>,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Unconditional(Target),
    /// A lookahead inside the key is checked against the packet end first.
    Select { key: CodeExpr, cases: Vec<SelectCase> },
}

impl Transition {
    fn targets(&self) -> Vec<&Target> {
        match self {
            Transition::Unconditional(target) => vec![target],
            Transition::Select { cases, .. } => cases.iter().map(|c| &c.target).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParserState {
    pub name: String,
    pub statements: Vec<Statement>,
    /// `None` rejects.
    pub transition: Option<Transition>,
}

impl ParserState {
    pub fn new(name: impl Into<String>) -> Self {
        ParserState {
            name: name.into(),
            statements: Vec::new(),
            transition: None,
        }
    }

    /// States this one can jump to.
    pub fn successors(&self) -> impl Iterator<Item = &str> {
        self.transition
            .iter()
            .flat_map(Transition::targets)
            .filter_map(|t| match t {
                Target::State(name) => Some(name.as_str()),
                Target::Terminal => None,
            })
    }

    /// Bit alignment of the running offset when the transition is taken, given the
    /// alignment on entry.
    pub fn exit_alignment(&self, entry: u32) -> u32 {
        self.statements.iter().fold(entry, |a, s| match s {
            Statement::ExtractField { ty: t, .. } | Statement::ExtractHeader { header: t, .. } => {
                (a + t.width_in_bits() % 8) % 8
            }
            Statement::Advance { bits: Some(b), .. } => ((u64::from(a) + b) % 8) as u32,
            Statement::Advance { bits: None, .. } => 0,
            Statement::Lookahead(_) | Statement::Comment(_) => a,
        })
    }

    /// Emit the state as a labeled block; `alignment` is the bit position of the running
    /// offset on entry.
    pub fn emit(&self, builder: &mut CodeBuilder, alignment: u32) -> Result<(), CompileError> {
        tracing::debug!(state = %self.name, statements = self.statements.len(), alignment, "emitting state");
        builder.emit_indent();
        builder.append(&self.name);
        builder.append(": ");
        builder.block_start();

        let mut ctx = EmitContext::new(builder, self.name.as_str());
        ctx.alignment = alignment;
        for s in &self.statements {
            emit_statement(&mut ctx, s)?;
        }

        match &self.transition {
            None => ctx.builder.statement(&format!("goto {}", REJECT_LABEL)),
            Some(t) => emit_transition(&mut ctx, t),
        }

        builder.block_end(true);
        Ok(())
    }
}

fn emit_statement(ctx: &mut EmitContext<'_>, statement: &Statement) -> Result<(), CompileError> {
    match statement {
        Statement::Comment(text) => {
            ctx.builder
                .append_line(&format!("/* {} */", text.replace("*/", "* /")));
        }
        Statement::ExtractField { dest, ty } => {
            emit_bounds_check(ctx.builder, ty.width_in_bits());
            extract_field(ctx, dest, ty)?;
        }
        Statement::ExtractHeader { dest, header } => emit_extract_header(ctx, dest, header)?,
        Statement::Lookahead(ty) => {
            emit_bounds_check(ctx.builder, ty.width_in_bits());
            let expr = lookahead_expr(ctx.alignment, ty);
            ctx.builder.statement(&format!("(void){}", expr));
        }
        Statement::Advance { amount, bits } => {
            if let Some(width) = amount.lookahead_bits() {
                emit_bounds_check(ctx.builder, width);
            }
            let amount = amount.render(ctx.alignment);
            emit_advance(ctx, &amount, *bits);
        }
    }
    Ok(())
}

fn emit_extract_header(
    ctx: &mut EmitContext<'_>,
    dest: &HeaderDest,
    header: &FieldType,
) -> Result<(), CompileError> {
    let Some(st) = header.as_header() else {
        return Err(CompileError::UnsupportedExtract {
            state: ctx.state.clone(),
            expr: header.to_string(),
            reason: "only headers can be extracted".to_string(),
        });
    };

    emit_bounds_check(ctx.builder, st.width_in_bits());

    let prefix = match dest {
        HeaderDest::Output { instance } => {
            let var = instance_var(instance);
            emit_allocation(ctx.builder, &var, &header.emit_type(), &st.name);
            format!("{}->", var)
        }
        HeaderDest::Local { var } => format!("{}.", var),
    };

    ctx.builder.statement(&format!(
        "{}header_offset = (uint32_t)({} / 8)",
        prefix, OFFSET_VAR
    ));
    for f in &st.fields {
        extract_field(ctx, &format!("{}{}", prefix, f.name), &f.ty)?;
    }
    ctx.builder
        .statement(&format!("{}header_valid = 1", prefix));
    Ok(())
}

/// Allocate the payload and its list node and link the node at the tail of the output.
fn emit_allocation(builder: &mut CodeBuilder, var: &str, c_type: &str, header: &str) {
    builder.statement(&format!("{} = ({} *)malloc(sizeof({}))", var, c_type, c_type));
    builder.emit_indent();
    builder.append(&format!("if ({} == NULL) ", var));
    builder.block_start();
    builder.statement(&format!("{} = OutOfMemory", ERROR_VAR));
    builder.statement(&format!("goto {}", END_LABEL));
    builder.block_end(true);

    builder.statement(&format!(
        "{} = ({} *)malloc(sizeof({}))",
        NODE_VAR, NODE_TYPE, NODE_TYPE
    ));
    builder.emit_indent();
    builder.append(&format!("if ({} == NULL) ", NODE_VAR));
    builder.block_start();
    builder.statement(&format!("free({})", var));
    builder.statement(&format!("{} = NULL", var));
    builder.statement(&format!("{} = OutOfMemory", ERROR_VAR));
    builder.statement(&format!("goto {}", END_LABEL));
    builder.block_end(true);

    builder.statement(&format!("{}->type = {}", NODE_VAR, discriminator(header)));
    builder.statement(&format!("{}->hdr = {}", NODE_VAR, var));
    builder.statement(&format!("{}->next = NULL", NODE_VAR));
    builder.emit_indent();
    builder.append(&format!("if ({} == NULL) ", LAST_NODE_VAR));
    builder.block_start();
    builder.statement(&format!("*{} = {}", OUT_PARAM, NODE_VAR));
    builder.block_end(false);
    builder.append(" else ");
    builder.block_start();
    builder.statement(&format!("{}->next = {}", LAST_NODE_VAR, NODE_VAR));
    builder.block_end(true);
    builder.statement(&format!("{} = {}", LAST_NODE_VAR, NODE_VAR));
}

fn emit_transition(ctx: &mut EmitContext<'_>, transition: &Transition) {
    let alignment = ctx.alignment;
    let builder = &mut *ctx.builder;
    match transition {
        Transition::Unconditional(target) => {
            builder.statement(&format!("goto {}", target.label()));
        }
        Transition::Select { key, cases } => {
            if let Some(bits) = key.lookahead_bits() {
                emit_bounds_check(builder, bits);
            }
            builder.emit_indent();
            builder.append(&format!("switch ({}) ", key.render(alignment)));
            builder.block_start();
            let mut has_default = false;
            for case in cases {
                match &case.value {
                    Some(v) => builder.statement(&format!("case {}: goto {}", v, case.target.label())),
                    None => {
                        has_default = true;
                        builder.statement(&format!("default: goto {}", case.target.label()));
                    }
                }
            }
            if !has_default {
                builder.statement(&format!("default: goto {}", REJECT_LABEL));
            }
            builder.block_end(true);
        }
    }
}

/// A terminal label returning the current status.
pub fn emit_terminal(builder: &mut CodeBuilder, label: &str) {
    builder.emit_indent();
    builder.append(label);
    builder.append(": ");
    builder.block_start();
    builder.statement(&format!("return {}", ERROR_VAR));
    builder.block_end(true);
}
