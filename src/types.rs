//! Type model: IR types canonicalized into C-representable field types.
//!
//! Every [`FieldType`] knows its source width and its storage width and can declare,
//! define and zero-initialize itself in C. Scalars up to 32 bits are stored in the
//! smallest of `uint8_t`/`uint16_t`/`uint32_t` that fits; wider scalars become byte
//! arrays. Typedefs become [`NamedType`]s that forward every layout query to the type
//! they alias.
//!
//! [`TypeFactory`] builds field types from [`TypeId`]s and memoizes on that identity for
//! the duration of one compilation.

use crate::builder::CodeBuilder;
use crate::error::CompileError;
use crate::ir::{IrType, StructKind, TypeArena, TypeId};
use crate::model::reserved;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Widest bit string a field may declare.
pub const MAX_FIELD_WIDTH: u32 = 1 << 16;

/// Capability of types with a fixed width.
pub trait HasWidth {
    /// Width in the source language.
    fn width_in_bits(&self) -> u32;
    /// Width reserved by the generated representation; always a multiple of 8.
    fn implementation_width_in_bits(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarType {
    pub width: u32,
    pub signed: bool,
}

impl ScalarType {
    pub fn new(width: u32, signed: bool) -> Self {
        ScalarType { width, signed }
    }

    pub fn bytes_required(&self) -> u32 {
        self.width.div_ceil(8)
    }

    /// True if a value of this width is stored in a machine scalar rather than a byte array.
    pub fn generates_scalar(width: u32) -> bool {
        width <= 32
    }

    /// C type of the storage. Byte arrays report their element pointer type.
    pub fn c_type(&self) -> String {
        let prefix = if self.signed { "" } else { "u" };
        if self.width <= 8 {
            format!("{}int8_t", prefix)
        } else if self.width <= 16 {
            format!("{}int16_t", prefix)
        } else if self.width <= 32 {
            format!("{}int32_t", prefix)
        } else {
            "uint8_t *".to_string()
        }
    }

    fn declare(&self, id: &str, as_pointer: bool) -> String {
        if Self::generates_scalar(self.width) {
            if as_pointer {
                format!("{} *{}", self.c_type(), id)
            } else {
                format!("{} {}", self.c_type(), id)
            }
        } else if as_pointer {
            format!("uint8_t *{}", id)
        } else {
            format!("uint8_t {}[{}]", id, self.bytes_required())
        }
    }
}

impl HasWidth for ScalarType {
    fn width_in_bits(&self) -> u32 {
        self.width
    }

    fn implementation_width_in_bits(&self) -> u32 {
        self.bytes_required() * 8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Rc<FieldType>,
}

/// Struct, header or header union.
#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub kind: StructKind,
    pub name: String,
    pub fields: Vec<Field>,
    width: u32,
    implementation_width: u32,
}

impl StructType {
    pub fn new(kind: StructKind, name: impl Into<String>, fields: Vec<Field>) -> Self {
        let width = fields.iter().map(|f| f.ty.width_in_bits()).sum();
        let implementation_width = fields
            .iter()
            .map(|f| f.ty.implementation_width_in_bits())
            .sum();
        StructType {
            kind,
            name: name.into(),
            fields,
            width,
            implementation_width,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self.kind {
            StructKind::Struct | StructKind::Header => "struct",
            StructKind::HeaderUnion => "union",
        }
    }

    pub fn is_header(&self) -> bool {
        self.kind == StructKind::Header
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn emit_definition(&self, builder: &mut CodeBuilder) {
        builder.emit_indent();
        builder.append(self.keyword());
        builder.space();
        builder.append(&self.name);
        builder.space();
        builder.block_start();

        for f in &self.fields {
            builder.emit_indent();
            builder.append(&f.ty.declare(&f.name, false));
            builder.append("; /* ");
            builder.append(&f.ty.to_string());
            builder.append(" */");
            builder.newline();
        }
        // C requires at least one member.
        if self.fields.is_empty() && !self.is_header() {
            builder.statement(&FieldType::bits(8).declare(&reserved("unused"), false));
        }

        if self.is_header() {
            builder.newline();
            builder.statement(&FieldType::bits(32).declare("header_offset", false));
            builder.statement(&FieldType::Boolean.declare("header_valid", false));
        }

        builder.block_end(false);
        builder.end_of_statement(true);
    }

    fn initializer(&self) -> String {
        match self.kind {
            StructKind::Header => "{ .header_valid = 0 }".to_string(),
            _ if self.fields.is_empty() => "{ 0 }".to_string(),
            StructKind::Struct => {
                let members: Vec<String> = self
                    .fields
                    .iter()
                    .map(|f| format!(".{} = {}", f.name, f.ty.initializer()))
                    .collect();
                format!("{{ {} }}", members.join(", "))
            }
            // Only one member of a union can be initialized.
            StructKind::HeaderUnion => {
                let f = &self.fields[0];
                format!("{{ .{} = {} }}", f.name, f.ty.initializer())
            }
        }
    }
}

impl HasWidth for StructType {
    fn width_in_bits(&self) -> u32 {
        self.width
    }

    fn implementation_width_in_bits(&self) -> u32 {
        self.implementation_width
    }
}

/// Alias of another type (typedef).
#[derive(Debug, Clone, PartialEq)]
pub struct NamedType {
    pub name: String,
    pub canonical: Rc<FieldType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub members: Vec<String>,
}

impl EnumType {
    fn emit_definition(&self, builder: &mut CodeBuilder) {
        builder.emit_indent();
        builder.append("enum ");
        builder.append(&self.name);
        builder.space();
        builder.block_start();
        for m in &self.members {
            builder.append_line(&format!("{},", m));
        }
        builder.block_end(false);
        builder.end_of_statement(true);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Boolean,
    Scalar(ScalarType),
    Struct(StructType),
    Named(NamedType),
    Enum(EnumType),
}

impl FieldType {
    pub fn bits(width: u32) -> Self {
        FieldType::Scalar(ScalarType::new(width, false))
    }

    /// The type with all aliases stripped.
    pub fn canonical(&self) -> &FieldType {
        match self {
            FieldType::Named(n) => n.canonical.canonical(),
            other => other,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self.canonical() {
            FieldType::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_header(&self) -> Option<&StructType> {
        self.as_struct().filter(|s| s.is_header())
    }

    /// True for values held in a single machine scalar: booleans, enums and scalars
    /// of at most 32 bits.
    pub fn is_machine_scalar(&self) -> bool {
        match self.canonical() {
            FieldType::Boolean | FieldType::Enum(_) => true,
            FieldType::Scalar(s) => ScalarType::generates_scalar(s.width),
            FieldType::Struct(_) | FieldType::Named(_) => false,
        }
    }

    /// C spelling of the type, e.g. `uint16_t`, `struct ipv4_h`, `enum color`.
    pub fn emit_type(&self) -> String {
        match self {
            FieldType::Boolean => "uint8_t".to_string(),
            FieldType::Scalar(s) => s.c_type(),
            FieldType::Struct(s) => format!("{} {}", s.keyword(), s.name),
            FieldType::Named(n) => n.canonical.emit_type(),
            FieldType::Enum(e) => format!("enum {}", e.name),
        }
    }

    /// Declaration of `id` with this type, without the trailing `;`.
    pub fn declare(&self, id: &str, as_pointer: bool) -> String {
        let star = if as_pointer { "*" } else { "" };
        match self {
            FieldType::Scalar(s) => s.declare(id, as_pointer),
            FieldType::Named(n) => n.canonical.declare(id, as_pointer),
            FieldType::Boolean | FieldType::Struct(_) | FieldType::Enum(_) => {
                format!("{} {}{}", self.emit_type(), star, id)
            }
        }
    }

    /// Zero initializer expression for a declaration of this type.
    pub fn initializer(&self) -> String {
        match self {
            FieldType::Boolean | FieldType::Enum(_) => "0".to_string(),
            FieldType::Scalar(s) if ScalarType::generates_scalar(s.width) => "0".to_string(),
            FieldType::Scalar(_) => "{ 0 }".to_string(),
            FieldType::Struct(s) => s.initializer(),
            FieldType::Named(n) => n.canonical.initializer(),
        }
    }

    /// Body of a struct, union or enum definition. Other types define nothing.
    pub fn emit_definition(&self, builder: &mut CodeBuilder) {
        match self {
            FieldType::Struct(s) => s.emit_definition(builder),
            FieldType::Enum(e) => e.emit_definition(builder),
            FieldType::Boolean | FieldType::Scalar(_) | FieldType::Named(_) => {}
        }
    }
}

impl HasWidth for FieldType {
    fn width_in_bits(&self) -> u32 {
        match self {
            FieldType::Boolean => 1,
            FieldType::Scalar(s) => s.width_in_bits(),
            FieldType::Struct(s) => s.width_in_bits(),
            FieldType::Named(n) => n.canonical.width_in_bits(),
            FieldType::Enum(_) => 32,
        }
    }

    fn implementation_width_in_bits(&self) -> u32 {
        match self {
            FieldType::Boolean => 8,
            FieldType::Scalar(s) => s.implementation_width_in_bits(),
            FieldType::Struct(s) => s.implementation_width_in_bits(),
            FieldType::Named(n) => n.canonical.implementation_width_in_bits(),
            FieldType::Enum(_) => 32,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Boolean => f.write_str("bool"),
            FieldType::Scalar(s) if s.signed => write!(f, "int<{}>", s.width),
            FieldType::Scalar(s) => write!(f, "bit<{}>", s.width),
            FieldType::Struct(s) => f.write_str(&s.name),
            FieldType::Named(n) => f.write_str(&n.name),
            FieldType::Enum(e) => f.write_str(&e.name),
        }
    }
}

/// Builds [`FieldType`]s from IR types, memoized by [`TypeId`].
pub struct TypeFactory<'a> {
    arena: &'a TypeArena,
    cache: HashMap<TypeId, Rc<FieldType>>,
}

impl<'a> TypeFactory<'a> {
    pub fn new(arena: &'a TypeArena) -> Self {
        TypeFactory {
            arena,
            cache: HashMap::new(),
        }
    }

    /// Field type for `id`. Creating the same id twice returns the same `Rc`.
    pub fn create(&mut self, id: TypeId) -> Result<Rc<FieldType>, CompileError> {
        if let Some(ty) = self.cache.get(&id) {
            return Ok(Rc::clone(ty));
        }

        let created = match self.arena.get(id) {
            IrType::Bool => FieldType::Boolean,
            IrType::Bits { width: 0, .. } => {
                return Err(self.unsupported(id, "bit strings must be at least 1 bit wide"))
            }
            IrType::Bits { width, .. } if *width > MAX_FIELD_WIDTH => {
                return Err(self.unsupported(
                    id,
                    &format!("bit strings are limited to {} bits", MAX_FIELD_WIDTH),
                ))
            }
            IrType::Bits { width, signed } => FieldType::Scalar(ScalarType::new(*width, *signed)),
            IrType::Struct(s) => {
                let mut fields = Vec::with_capacity(s.fields.len());
                for f in &s.fields {
                    let ty = self.create(f.ty).map_err(|e| match e {
                        CompileError::UnsupportedType {
                            ty,
                            field: None,
                            reason,
                        } => CompileError::UnsupportedType {
                            ty,
                            field: Some(format!("{}.{}", s.name, f.name)),
                            reason,
                        },
                        other => other,
                    })?;
                    fields.push(Field {
                        name: f.name.clone(),
                        ty,
                    });
                }
                let storage = fields
                    .iter()
                    .try_fold(0u32, |acc, f| acc.checked_add(f.ty.implementation_width_in_bits()));
                if storage.is_none() {
                    return Err(self.unsupported(id, "total width does not fit in 32 bits"));
                }
                FieldType::Struct(StructType::new(s.kind, s.name.clone(), fields))
            }
            IrType::Typedef { name, target } => FieldType::Named(NamedType {
                name: name.clone(),
                canonical: self.create(*target)?,
            }),
            IrType::Enum { name, members } => FieldType::Enum(EnumType {
                name: name.clone(),
                members: members.clone(),
            }),
            IrType::Varbit { .. } => {
                return Err(self.unsupported(id, "variable-length fields are not supported"))
            }
            IrType::Stack { .. } => return Err(self.unsupported(id, "header stacks are not supported")),
            IrType::Error | IrType::PacketIn => {
                return Err(self.unsupported(id, "type does not have a fixed width"))
            }
        };

        tracing::debug!(ty = %self.arena.describe(id), "created field type");
        let created = Rc::new(created);
        self.cache.insert(id, Rc::clone(&created));
        Ok(created)
    }

    fn unsupported(&self, id: TypeId, reason: &str) -> CompileError {
        CompileError::UnsupportedType {
            ty: self.arena.describe(id),
            field: None,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrField, IrStruct};
    use pretty_assertions::assert_eq;

    fn header(arena: &mut TypeArena, name: &str, widths: &[(&str, u32)]) -> TypeId {
        let fields = widths
            .iter()
            .map(|(n, w)| IrField {
                name: n.to_string(),
                ty: arena.bits(*w),
            })
            .collect();
        arena.alloc(IrType::Struct(IrStruct {
            kind: StructKind::Header,
            name: name.to_string(),
            fields,
        }))
    }

    #[test]
    fn scalar_widths_round_up_to_bytes() {
        for (w, storage) in [(1, 8), (8, 8), (9, 16), (16, 16), (17, 32), (32, 32), (33, 40), (48, 48)] {
            let t = FieldType::bits(w);
            assert_eq!(t.width_in_bits(), w);
            assert_eq!(t.implementation_width_in_bits(), storage, "width {}", w);
        }
        assert_eq!(FieldType::Boolean.width_in_bits(), 1);
        assert_eq!(FieldType::Boolean.implementation_width_in_bits(), 8);
    }

    #[test]
    fn scalar_declarations() {
        assert_eq!(FieldType::bits(4).declare("a", false), "uint8_t a");
        assert_eq!(FieldType::bits(12).declare("b", false), "uint16_t b");
        assert_eq!(FieldType::bits(32).declare("c", true), "uint32_t *c");
        assert_eq!(FieldType::bits(48).declare("mac", false), "uint8_t mac[6]");
        assert_eq!(FieldType::bits(48).declare("mac", true), "uint8_t *mac");
        let signed = FieldType::Scalar(ScalarType::new(16, true));
        assert_eq!(signed.declare("s", false), "int16_t s");
        assert_eq!(signed.to_string(), "int<16>");
        assert_eq!(FieldType::Boolean.declare("v", false), "uint8_t v");
    }

    #[test]
    fn struct_widths_sum_members() {
        let mut arena = TypeArena::new();
        let h = header(&mut arena, "h_t", &[("a", 4), ("b", 12), ("mac", 48)]);
        let mut factory = TypeFactory::new(&arena);
        let t = factory.create(h).expect("create");
        assert_eq!(t.width_in_bits(), 64);
        assert_eq!(t.implementation_width_in_bits(), 8 + 16 + 48);
    }

    #[test]
    fn factory_memoizes_by_identity() {
        let mut arena = TypeArena::new();
        let h = header(&mut arena, "h_t", &[("a", 8)]);
        let other = arena.bits(8);
        let mut factory = TypeFactory::new(&arena);
        let first = factory.create(h).expect("create");
        let second = factory.create(h).expect("create");
        assert!(Rc::ptr_eq(&first, &second));
        let distinct = factory.create(other).expect("create");
        let member = &first.as_struct().expect("struct").fields[0].ty;
        assert!(!Rc::ptr_eq(member, &distinct));
    }

    #[test]
    fn typedef_is_transparent_for_layout() {
        let mut arena = TypeArena::new();
        let bits = arena.bits(48);
        let alias = arena.alloc(IrType::Typedef {
            name: "mac_addr_t".into(),
            target: bits,
        });
        let mut factory = TypeFactory::new(&arena);
        let t = factory.create(alias).expect("create");
        assert_eq!(t.width_in_bits(), 48);
        assert_eq!(t.declare("dst", false), "uint8_t dst[6]");
        assert_eq!(t.to_string(), "mac_addr_t");
        assert_eq!(t.canonical(), &FieldType::bits(48));
    }

    #[test]
    fn header_definition_appends_offset_and_valid() {
        let mut arena = TypeArena::new();
        let h = header(&mut arena, "ethernet_h", &[("dst_addr", 48), ("ether_type", 16)]);
        let mut factory = TypeFactory::new(&arena);
        let t = factory.create(h).expect("create");
        let mut b = CodeBuilder::new();
        t.emit_definition(&mut b);
        assert_eq!(
            b.finish(),
            "struct ethernet_h {\n\
             \x20   uint8_t dst_addr[6]; /* bit<48> */\n\
             \x20   uint16_t ether_type; /* bit<16> */\n\
             \n\
             \x20   uint32_t header_offset;\n\
             \x20   uint8_t header_valid;\n\
             };\n"
        );
        assert_eq!(t.initializer(), "{ .header_valid = 0 }");
    }

    #[test]
    fn struct_and_union_definitions() {
        let mut arena = TypeArena::new();
        let flag = arena.alloc(IrType::Bool);
        let wide = arena.bits(40);
        let s = arena.alloc(IrType::Struct(IrStruct {
            kind: StructKind::Struct,
            name: "meta_t".into(),
            fields: vec![
                IrField { name: "seen".into(), ty: flag },
                IrField { name: "tag".into(), ty: wide },
            ],
        }));
        let u = arena.alloc(IrType::Struct(IrStruct {
            kind: StructKind::HeaderUnion,
            name: "ip_u".into(),
            fields: vec![IrField { name: "m".into(), ty: s }],
        }));
        let mut factory = TypeFactory::new(&arena);
        let st = factory.create(s).expect("struct");
        assert_eq!(st.initializer(), "{ .seen = 0, .tag = { 0 } }");
        let ut = factory.create(u).expect("union");
        assert_eq!(ut.declare("ip", true), "union ip_u *ip");
        let mut b = CodeBuilder::new();
        ut.emit_definition(&mut b);
        assert_eq!(b.finish(), "union ip_u {\n    struct meta_t m; /* meta_t */\n};\n");
    }

    #[test]
    fn enum_definition_and_width() {
        let mut arena = TypeArena::new();
        let e = arena.alloc(IrType::Enum {
            name: "color".into(),
            members: vec!["RED".into(), "GREEN".into()],
        });
        let mut factory = TypeFactory::new(&arena);
        let t = factory.create(e).expect("create");
        assert_eq!(t.width_in_bits(), 32);
        assert_eq!(t.implementation_width_in_bits(), 32);
        assert_eq!(t.declare("c", false), "enum color c");
        let mut b = CodeBuilder::new();
        t.emit_definition(&mut b);
        assert_eq!(b.finish(), "enum color {\n    RED,\n    GREEN,\n};\n");
    }

    #[test]
    fn unsupported_member_names_the_field() {
        let mut arena = TypeArena::new();
        let opts = arena.alloc(IrType::Varbit { max_width: 320 });
        let h = arena.alloc(IrType::Struct(IrStruct {
            kind: StructKind::Header,
            name: "ipv4_h".into(),
            fields: vec![IrField { name: "options".into(), ty: opts }],
        }));
        let mut factory = TypeFactory::new(&arena);
        let err = factory.create(h).expect_err("varbit member");
        assert_eq!(
            err,
            CompileError::UnsupportedType {
                ty: "varbit<320>".into(),
                field: Some("ipv4_h.options".into()),
                reason: "variable-length fields are not supported".into(),
            }
        );
    }

    #[test]
    fn oversized_widths_are_rejected() {
        let mut arena = TypeArena::new();
        let h = header(&mut arena, "huge_h", &[("x", u32::MAX)]);
        let mut factory = TypeFactory::new(&arena);
        let err = factory.create(h).expect_err("4294967295 bits");
        assert!(matches!(
            &err,
            CompileError::UnsupportedType { field: Some(f), .. } if f == "huge_h.x"
        ));

        let mut arena = TypeArena::new();
        let h = header(&mut arena, "widest_h", &[("x", MAX_FIELD_WIDTH)]);
        let mut factory = TypeFactory::new(&arena);
        let t = factory.create(h).expect("widest field");
        assert_eq!(t.implementation_width_in_bits(), MAX_FIELD_WIDTH);
    }

    #[test]
    fn struct_total_width_is_checked() {
        let mut arena = TypeArena::new();
        let widest = arena.bits(MAX_FIELD_WIDTH);
        let fields: Vec<IrField> = (0..=u32::MAX / MAX_FIELD_WIDTH)
            .map(|i| IrField { name: format!("f{}", i), ty: widest })
            .collect();
        let s = arena.alloc(IrType::Struct(IrStruct {
            kind: StructKind::Struct,
            name: "giant_t".into(),
            fields,
        }));
        let mut factory = TypeFactory::new(&arena);
        let err = factory.create(s).expect_err("more than 2^32 bits");
        assert_eq!(
            err,
            CompileError::UnsupportedType {
                ty: "giant_t".into(),
                field: None,
                reason: "total width does not fit in 32 bits".into(),
            }
        );
    }

    #[test]
    fn empty_struct_gets_a_placeholder_member() {
        let mut arena = TypeArena::new();
        let s = arena.alloc(IrType::Struct(IrStruct {
            kind: StructKind::Struct,
            name: "empty_t".into(),
            fields: vec![],
        }));
        let h = header(&mut arena, "empty_h", &[]);
        let mut factory = TypeFactory::new(&arena);
        let st = factory.create(s).expect("struct");
        let mut b = CodeBuilder::new();
        st.emit_definition(&mut b);
        assert_eq!(b.finish(), "struct empty_t {\n    uint8_t fpp_unused;\n};\n");
        assert_eq!(st.initializer(), "{ 0 }");

        let ht = factory.create(h).expect("header");
        let mut b = CodeBuilder::new();
        ht.emit_definition(&mut b);
        assert!(!b.finish().contains("fpp_unused"));
    }
}
