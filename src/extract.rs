//! Bit-level field extraction.
//!
//! A field that fits a machine scalar is read with a single load of 8, 16, 32 or 64
//! bits, chosen by the field's span from the current bit alignment, converted from
//! network order and then shifted and masked down to its own bits. Wider fields are
//! stored as byte arrays and assembled one byte at a time, each byte read with a byte
//! load or, when it straddles a byte boundary, a half-word load.
//!
//! All reads go through the `load_*` helpers emitted by [`emit_helpers`], which never
//! read past the end of the packet.

use crate::builder::CodeBuilder;
use crate::error::CompileError;
use crate::ir::StructKind;
use crate::model::{
    BYTES_MACRO, ERROR_VAR, MASK_MACRO, OFFSET_VAR, PACKET_END_VAR, PACKET_START_VAR,
};
use crate::types::{FieldType, HasWidth, ScalarType};
use std::rc::Rc;

/// Code emission state threaded through one parser state.
pub struct EmitContext<'b> {
    pub builder: &'b mut CodeBuilder,
    /// Bit position of the running offset within its byte, when statically known.
    pub alignment: u32,
    /// Name of the state being emitted, for diagnostics.
    pub state: String,
}

impl<'b> EmitContext<'b> {
    pub fn new(builder: &'b mut CodeBuilder, state: impl Into<String>) -> Self {
        EmitContext {
            builder,
            alignment: 0,
            state: state.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSize {
    Byte,
    Half,
    Word,
    Dword,
}

impl LoadSize {
    /// Smallest load covering `span` bits from the start of a byte.
    pub fn for_span(span: u32) -> Self {
        if span <= 8 {
            LoadSize::Byte
        } else if span <= 16 {
            LoadSize::Half
        } else if span <= 32 {
            LoadSize::Word
        } else {
            LoadSize::Dword
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            LoadSize::Byte => 8,
            LoadSize::Half => 16,
            LoadSize::Word => 32,
            LoadSize::Dword => 64,
        }
    }

    pub fn loader(self) -> &'static str {
        match self {
            LoadSize::Byte => "load_byte",
            LoadSize::Half => "load_half",
            LoadSize::Word => "load_word",
            LoadSize::Dword => "load_dword",
        }
    }

    /// Network-to-host conversion applied to the loaded value.
    pub fn conversion(self) -> Option<&'static str> {
        match self {
            LoadSize::Byte => None,
            LoadSize::Half => Some("ntohs"),
            LoadSize::Word => Some("ntohl"),
            LoadSize::Dword => Some("fpp_ntohll"),
        }
    }

    pub fn c_type(self) -> &'static str {
        match self {
            LoadSize::Byte => "uint8_t",
            LoadSize::Half => "uint16_t",
            LoadSize::Word => "uint32_t",
            LoadSize::Dword => "uint64_t",
        }
    }
}

/// One load-shift-mask read. The value is
/// `(load(BYTES(offset) + byte_offset) >> shift) & mask(mask)`, all in network order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarLoad {
    pub load: LoadSize,
    pub shift: u32,
    /// Number of low bits kept; `None` when the whole load is the value.
    pub mask: Option<u32>,
    /// Bytes past the byte holding the running offset.
    pub byte_offset: u32,
}

impl ScalarLoad {
    /// Read `width` bits starting `alignment` bits into the current byte.
    pub fn plan(alignment: u32, width: u32) -> Self {
        Self::plan_at(0, alignment, width)
    }

    fn plan_at(byte_offset: u32, alignment: u32, width: u32) -> Self {
        let load = LoadSize::for_span(alignment + width);
        ScalarLoad {
            load,
            shift: load.bits() - alignment - width,
            mask: (width != load.bits()).then_some(width),
            byte_offset,
        }
    }

    /// C expression for the value, cast to `cast`.
    pub fn render(&self, cast: &str) -> String {
        let position = if self.byte_offset == 0 {
            format!("{}({})", BYTES_MACRO, OFFSET_VAR)
        } else {
            format!("{}({}) + {}", BYTES_MACRO, OFFSET_VAR, self.byte_offset)
        };
        let mut expr = format!("{}({}, {})", self.load.loader(), PACKET_START_VAR, position);
        if let Some(conv) = self.load.conversion() {
            expr = format!("{}({})", conv, expr);
        }
        if self.shift > 0 {
            expr = format!("({} >> {})", expr, self.shift);
        }
        if let Some(bits) = self.mask {
            expr = format!("({} & {}({}, {}))", expr, MASK_MACRO, self.load.c_type(), bits);
        }
        format!("({}){}", cast, expr)
    }
}

/// How a field of a given width is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPlan {
    Scalar(ScalarLoad),
    /// One read per destination byte, most significant first.
    Bytes(Vec<ScalarLoad>),
}

pub fn plan_field(alignment: u32, width: u32) -> FieldPlan {
    if ScalarType::generates_scalar(width) {
        return FieldPlan::Scalar(ScalarLoad::plan(alignment, width));
    }
    let count = width.div_ceil(8);
    let loads = (0..count)
        .map(|i| {
            let bits = if i + 1 == count && width % 8 != 0 { width % 8 } else { 8 };
            ScalarLoad::plan_at(i, alignment, bits)
        })
        .collect();
    FieldPlan::Bytes(loads)
}

/// Emit the extraction of `ty` into the lvalue `dest` and advance the running offset.
pub fn extract_field(
    ctx: &mut EmitContext<'_>,
    dest: &str,
    ty: &FieldType,
) -> Result<(), CompileError> {
    match ty {
        FieldType::Named(n) => extract_field(ctx, dest, &n.canonical),
        FieldType::Boolean | FieldType::Enum(_) => {
            emit_plan(ctx, dest, &ty.emit_type(), ty.width_in_bits());
            Ok(())
        }
        FieldType::Scalar(s) => {
            emit_plan(ctx, dest, &s.c_type(), s.width);
            Ok(())
        }
        FieldType::Struct(s) if s.kind == StructKind::Struct => {
            for f in &s.fields {
                extract_field(ctx, &format!("{}.{}", dest, f.name), &f.ty)?;
            }
            Ok(())
        }
        FieldType::Struct(s) => Err(CompileError::UnsupportedExtract {
            state: ctx.state.clone(),
            expr: dest.to_string(),
            reason: format!("{} {} cannot be nested in an extracted value", s.keyword(), s.name),
        }),
    }
}

fn emit_plan(ctx: &mut EmitContext<'_>, dest: &str, cast: &str, width: u32) {
    match plan_field(ctx.alignment, width) {
        FieldPlan::Scalar(load) => {
            ctx.builder
                .statement(&format!("{} = {}", dest, load.render(cast)));
        }
        FieldPlan::Bytes(loads) => {
            for (i, load) in loads.iter().enumerate() {
                ctx.builder
                    .statement(&format!("{}[{}] = {}", dest, i, load.render("uint8_t")));
            }
        }
    }
    ctx.builder
        .statement(&format!("{} += {}", OFFSET_VAR, width));
    ctx.alignment = (ctx.alignment + width) % 8;
}

/// Check that `packet.lookahead<T>()` can be read with a single scalar load.
pub fn check_lookahead(
    state: &str,
    ty: Option<Rc<FieldType>>,
) -> Result<Rc<FieldType>, CompileError> {
    let ty = ty.ok_or_else(|| CompileError::UnsupportedLookahead {
        state: state.to_string(),
        reason: "lookahead without a type argument".to_string(),
    })?;
    if !ty.is_machine_scalar() {
        return Err(CompileError::UnsupportedLookahead {
            state: state.to_string(),
            reason: format!(
                "lookahead of {} ({} bits) is wider than 32 bits",
                ty,
                ty.width_in_bits()
            ),
        });
    }
    Ok(ty)
}

/// Value of `packet.lookahead<T>()` read `alignment` bits into the current byte. The
/// offset is not advanced.
pub fn lookahead_expr(alignment: u32, ty: &FieldType) -> String {
    ScalarLoad::plan(alignment, ty.width_in_bits()).render(&ty.emit_type())
}

#[derive(Debug, Clone, PartialEq)]
enum CodePart {
    Text(String),
    Lookahead(Rc<FieldType>),
}

/// A C expression whose lookaheads are planned against the alignment at the point it
/// is emitted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeExpr {
    parts: Vec<CodePart>,
}

impl CodeExpr {
    pub fn text(s: impl Into<String>) -> Self {
        CodeExpr {
            parts: vec![CodePart::Text(s.into())],
        }
    }

    pub fn lookahead(ty: Rc<FieldType>) -> Self {
        CodeExpr {
            parts: vec![CodePart::Lookahead(ty)],
        }
    }

    pub fn push_str(&mut self, s: &str) {
        match self.parts.last_mut() {
            Some(CodePart::Text(t)) => t.push_str(s),
            _ => self.parts.push(CodePart::Text(s.to_string())),
        }
    }

    pub fn append(&mut self, other: CodeExpr) {
        for part in other.parts {
            match part {
                CodePart::Text(t) => self.push_str(&t),
                l @ CodePart::Lookahead(_) => self.parts.push(l),
            }
        }
    }

    /// The text of an expression without lookaheads.
    pub fn plain(&self) -> Option<String> {
        self.parts
            .iter()
            .map(|p| match p {
                CodePart::Text(t) => Some(t.as_str()),
                CodePart::Lookahead(_) => None,
            })
            .collect()
    }

    /// Widest lookahead inside the expression.
    pub fn lookahead_bits(&self) -> Option<u32> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                CodePart::Lookahead(ty) => Some(ty.width_in_bits()),
                CodePart::Text(_) => None,
            })
            .max()
    }

    pub fn render(&self, alignment: u32) -> String {
        self.parts
            .iter()
            .map(|p| match p {
                CodePart::Text(t) => t.clone(),
                CodePart::Lookahead(ty) => lookahead_expr(alignment, ty),
            })
            .collect()
    }
}

impl From<&str> for CodeExpr {
    fn from(s: &str) -> Self {
        CodeExpr::text(s)
    }
}

/// Reject the packet unless `width` more bits are available past the running offset.
pub fn emit_bounds_check(builder: &mut CodeBuilder, width: u32) {
    builder.emit_indent();
    builder.append(&format!(
        "if ({} < {} + {}({} + {})) ",
        PACKET_END_VAR,
        PACKET_START_VAR,
        BYTES_MACRO,
        OFFSET_VAR,
        u64::from(width) + 7
    ));
    builder.block_start();
    builder.statement(&format!("{} = PacketTooShort", ERROR_VAR));
    builder.statement("goto reject");
    builder.block_end(true);
}

/// `packet.advance(amount)`. `bits` is the amount when it is a constant; after a
/// non-constant advance the offset is assumed to be byte aligned.
pub fn emit_advance(ctx: &mut EmitContext<'_>, amount: &str, bits: Option<u64>) {
    ctx.builder
        .statement(&format!("{} += {}", OFFSET_VAR, amount));
    ctx.alignment = match bits {
        Some(b) => ((u64::from(ctx.alignment) + b) % 8) as u32,
        None => 0,
    };
}

/// Macros and inline functions the generated body reads the packet through.
pub fn emit_helpers(builder: &mut CodeBuilder) {
    builder.append_line(&format!("#define {}(w) ((w) / 8)", BYTES_MACRO));
    builder.append_line(&format!(
        "#define {}(t, w) ((t)((((t)1) << (w)) - 1))",
        MASK_MACRO
    ));
    builder.newline();

    for load in [LoadSize::Byte, LoadSize::Half, LoadSize::Word, LoadSize::Dword] {
        let ty = load.c_type();
        builder.append_line(&format!(
            "static inline {} fpp_{}(const uint8_t *p, const uint8_t *end)",
            ty,
            load.loader()
        ));
        builder.block_start();
        builder.statement(&format!("{} v = 0", ty));
        builder.statement("size_t n = p < end ? (size_t)(end - p) : 0");
        builder.statement("memcpy(&v, p, n < sizeof(v) ? n : sizeof(v))");
        builder.statement("return v");
        builder.block_end(true);
        builder.newline();
    }

    for load in [LoadSize::Byte, LoadSize::Half, LoadSize::Word, LoadSize::Dword] {
        builder.append_line(&format!(
            "#define {l}(s, b) fpp_{l}((s) + (b), {})",
            PACKET_END_VAR,
            l = load.loader()
        ));
    }
    builder.newline();

    builder.append_line("static inline uint64_t fpp_ntohll(uint64_t v)");
    builder.block_start();
    builder.statement("const uint8_t *b = (const uint8_t *)&v");
    builder.append_line("return ((uint64_t)b[0] << 56) | ((uint64_t)b[1] << 48) |");
    builder.append_line("       ((uint64_t)b[2] << 40) | ((uint64_t)b[3] << 32) |");
    builder.append_line("       ((uint64_t)b[4] << 24) | ((uint64_t)b[5] << 16) |");
    builder.append_line("       ((uint64_t)b[6] << 8) | (uint64_t)b[7];");
    builder.block_end(true);
    builder.newline();
}
