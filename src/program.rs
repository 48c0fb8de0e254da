//! Program assembly: the declarations unit and the body unit of one generated parser.
//!
//! [`Program::build`] resolves every type the parser touches, lowers and renders all
//! states, and collects every error it meets on the way. A program that builds can
//! always be emitted.

use crate::builder::CodeBuilder;
use crate::error::{CompileError, Diagnostics};
use crate::extract::emit_helpers;
use crate::ir;
use crate::lower::{lower_state, Scope};
use crate::model::{
    discriminator, instance_var, END_LABEL, ERROR_CODES, ERROR_ENUM, ERROR_VAR, HEADER_ENUM,
    LAST_NODE_VAR, LENGTH_PARAM, NODE_STRUCT, NODE_TYPE, NODE_VAR, OFFSET_VAR, OUT_PARAM,
    PACKET_END_VAR, PACKET_PARAM, PACKET_START_VAR, REJECT_LABEL,
};
use crate::options::Options;
use crate::state::{emit_terminal, ParserState};
use crate::target::{target_for, CodegenTarget};
use crate::types::{FieldType, TypeFactory};
use std::collections::HashMap;
use std::rc::Rc;

/// The two generated units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedUnits {
    pub header: String,
    pub body: String,
}

pub struct Program {
    target: Box<dyn CodegenTarget>,
    options: Options,
    /// User struct, union and enum types, dependencies first.
    types: Vec<Rc<FieldType>>,
    /// Header types linked into the output list, in first-reference order.
    headers: Vec<String>,
    instances: Vec<(String, Rc<FieldType>)>,
    locals: Vec<(String, Rc<FieldType>)>,
    states: Vec<ParserState>,
    /// Rendered states, indented for the function body.
    state_code: String,
}

impl Program {
    #[tracing::instrument(skip_all)]
    pub fn build(program: &ir::Program, options: Options) -> Result<Program, Diagnostics> {
        let target = target_for(options.target.as_deref())?;
        let parser = program.parser.as_ref().ok_or(CompileError::MissingEntry)?;
        if parser.params.len() != 2 {
            return Err(CompileError::WrongArity {
                parser: parser.name.clone(),
                found: parser.params.len(),
            }
            .into());
        }
        if parser.states.is_empty() {
            return Err(CompileError::NoStates {
                parser: parser.name.clone(),
            }
            .into());
        }
        tracing::debug!(parser = %parser.name, states = parser.states.len(), "building program");

        let mut factory = TypeFactory::new(&program.types);
        let output_param = &parser.params[1];
        let outputs = factory.create(output_param.ty)?;
        let Some(output_struct) = outputs.as_struct() else {
            return Err(CompileError::UnsupportedType {
                ty: program.types.describe(output_param.ty),
                field: Some(output_param.name.clone()),
                reason: "the output parameter must be a struct of headers".to_string(),
            }
            .into());
        };

        let mut diagnostics = Diagnostics::new();
        let mut types = Vec::new();
        collect_definitions(&outputs, &mut types);

        let mut instances = Vec::new();
        let mut headers: Vec<String> = Vec::new();
        for f in &output_struct.fields {
            if let Some(h) = f.ty.as_header() {
                if !headers.contains(&h.name) {
                    headers.push(h.name.clone());
                }
                instances.push((f.name.clone(), Rc::clone(&f.ty)));
            }
        }

        let mut locals = Vec::new();
        for local in &parser.locals {
            if let Some(ty) = diagnostics.check(factory.create(local.ty)) {
                collect_definitions(&ty, &mut types);
                locals.push((local.name.clone(), ty));
            }
        }

        let scope = Scope {
            packet: parser.params[0].name.clone(),
            headers: output_param.name.clone(),
            outputs: Rc::clone(&outputs),
            locals: locals.clone(),
            states: parser.states.iter().map(|s| s.name.clone()).collect(),
        };

        let lowered: Vec<ParserState> = parser
            .states
            .iter()
            .filter_map(|state| diagnostics.check(lower_state(&scope, &mut factory, state)))
            .collect();
        let alignments = entry_alignments(&lowered, &mut diagnostics);

        let mut states = Vec::with_capacity(lowered.len());
        let mut code = CodeBuilder::new();
        code.increase_indent();
        for state in lowered {
            let alignment = alignments.get(&state.name).copied().unwrap_or(0);
            if diagnostics.check(state.emit(&mut code, alignment)).is_some() {
                states.push(state);
            }
        }

        diagnostics.finish(Program {
            target,
            options,
            types,
            headers,
            instances,
            locals,
            states,
            state_code: code.finish(),
        })
    }

    pub fn states(&self) -> &[ParserState] {
        &self.states
    }

    pub fn instances(&self) -> &[(String, Rc<FieldType>)] {
        &self.instances
    }

    fn emit_generated_comment(&self, builder: &mut CodeBuilder) {
        match &self.options.source_name {
            Some(source) => builder.append_line(&format!(
                "/* Automatically generated by fppc from {}. Do not edit. */",
                source
            )),
            None => builder.append_line("/* Automatically generated by fppc. Do not edit. */"),
        }
        builder.newline();
    }

    fn prototype(&self) -> String {
        format!(
            "int {}(const uint8_t *{}, uint32_t {}, {} **{})",
            self.options.function_name, PACKET_PARAM, LENGTH_PARAM, NODE_TYPE, OUT_PARAM
        )
    }

    /// The declarations unit.
    pub fn emit_h(&self) -> String {
        let mut b = CodeBuilder::new();
        self.emit_generated_comment(&mut b);
        let guard = self.options.include_guard();
        b.append_line(&format!("#ifndef {}", guard));
        b.append_line(&format!("#define {}", guard));
        b.newline();
        self.target.emit_includes(&mut b);
        b.newline();

        b.append(&format!("enum {} ", ERROR_ENUM));
        b.block_start();
        for code in ERROR_CODES {
            b.append_line(&format!("{},", code));
        }
        b.block_end(false);
        b.end_of_statement(true);
        b.newline();

        b.append(&format!("enum {} ", HEADER_ENUM));
        b.block_start();
        if self.headers.is_empty() {
            b.append_line(&format!("{},", discriminator("noHeaders")));
        }
        for h in &self.headers {
            b.append_line(&format!("{},", discriminator(h)));
        }
        b.block_end(false);
        b.end_of_statement(true);
        b.newline();

        b.append(&format!("typedef struct {} ", NODE_STRUCT));
        b.block_start();
        b.statement(&format!("enum {} type", HEADER_ENUM));
        b.statement("void *hdr");
        b.statement(&format!("struct {} *next", NODE_STRUCT));
        b.block_end(false);
        b.append(&format!(" {}", NODE_TYPE));
        b.end_of_statement(true);
        b.newline();

        for ty in &self.types {
            ty.emit_definition(&mut b);
            b.newline();
        }

        b.statement(&self.prototype());
        b.newline();
        b.append_line(&format!("#endif /* {} */", guard));
        b.finish()
    }

    /// The body unit.
    pub fn emit_c(&self) -> String {
        let mut b = CodeBuilder::new();
        self.emit_generated_comment(&mut b);
        b.append_line(&format!("#include \"{}\"", self.options.header_file));
        b.newline();
        emit_helpers(&mut b);

        b.append_line(&self.prototype());
        b.block_start();
        b.statement(&format!("uint64_t {} = 0", OFFSET_VAR));
        b.statement(&format!("enum {} {} = NoError", ERROR_ENUM, ERROR_VAR));
        b.statement(&format!("const uint8_t *{} = {}", PACKET_START_VAR, PACKET_PARAM));
        b.statement(&format!(
            "const uint8_t *{} = {} + {}",
            PACKET_END_VAR, PACKET_PARAM, LENGTH_PARAM
        ));
        b.statement(&format!("{} *{} = NULL", NODE_TYPE, NODE_VAR));
        b.statement(&format!("{} *{} = NULL", NODE_TYPE, LAST_NODE_VAR));
        for (name, ty) in &self.instances {
            b.statement(&format!("{} = NULL", ty.declare(&instance_var(name), true)));
        }
        for (name, ty) in &self.locals {
            b.statement(&format!("{} = {}", ty.declare(name, false), ty.initializer()));
        }
        b.newline();
        b.statement(&format!("*{} = NULL", OUT_PARAM));
        if let Some(first) = self.states.first() {
            b.statement(&format!("goto {}", first.name));
        }
        b.append(&self.state_code);
        emit_terminal(&mut b, REJECT_LABEL);
        emit_terminal(&mut b, END_LABEL);
        b.block_end(true);
        b.finish()
    }

    pub fn generate(&self) -> GeneratedUnits {
        GeneratedUnits {
            header: self.emit_h(),
            body: self.emit_c(),
        }
    }
}

/// Bit alignment of the running offset on entry to each state, starting byte aligned at
/// the first state. A state reached at two different alignments is reported.
fn entry_alignments(states: &[ParserState], diagnostics: &mut Diagnostics) -> HashMap<String, u32> {
    let by_name: HashMap<&str, &ParserState> = states.iter().map(|s| (s.name.as_str(), s)).collect();
    let mut entry = HashMap::new();
    let mut pending = Vec::new();
    if let Some(first) = states.first() {
        entry.insert(first.name.clone(), 0);
        pending.push(first);
    }
    while let Some(state) = pending.pop() {
        let exit = state.exit_alignment(entry.get(&state.name).copied().unwrap_or(0));
        for next in state.successors() {
            match entry.get(next) {
                None => {
                    entry.insert(next.to_string(), exit);
                    if let Some(s) = by_name.get(next) {
                        pending.push(*s);
                    }
                }
                Some(&known) if known != exit => {
                    diagnostics.report(CompileError::ConflictingAlignment {
                        state: next.to_string(),
                        first: known,
                        second: exit,
                    });
                }
                Some(_) => {}
            }
        }
    }
    entry
}

/// Add the definitions `ty` needs, then `ty` itself, skipping those already present.
fn collect_definitions(ty: &Rc<FieldType>, out: &mut Vec<Rc<FieldType>>) {
    match ty.as_ref() {
        FieldType::Named(n) => collect_definitions(&n.canonical, out),
        FieldType::Struct(s) => {
            for f in &s.fields {
                collect_definitions(&f.ty, out);
            }
            if !out.iter().any(|t| t.emit_type() == ty.emit_type()) {
                out.push(Rc::clone(ty));
            }
        }
        FieldType::Enum(_) => {
            if !out.iter().any(|t| t.emit_type() == ty.emit_type()) {
                out.push(Rc::clone(ty));
            }
        }
        FieldType::Boolean | FieldType::Scalar(_) => {}
    }
}
