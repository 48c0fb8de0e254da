//! # fppc: Fast Packet Parser Compiler
//!
//! Compiles a declarative packet parser (named states that extract typed headers and
//! branch on extracted values) into a C routine that parses a raw byte buffer into a
//! linked list of header records.
//!
//! ## Pipeline
//!
//! - [`parse`]: `.fpp` source to AST (PEST grammar)
//! - [`resolve`]: AST to the resolved [`ir::Program`]
//! - [`Program::build`]: type model, state lowering and emission, with every error
//!   collected into [`Diagnostics`]
//! - [`Program::emit_h`] / [`Program::emit_c`]: the declarations and body units
//!
//! ## Example description
//!
//! ```text
//! header ethernet_h { dst_addr: bit<48>; src_addr: bit<48>; ether_type: bit<16>; }
//! struct headers_t { ethernet: ethernet_h; }
//!
//! parser prs(packet_in packet, out headers_t headers) {
//!     state start {
//!         packet.extract(headers.ethernet);
//!         transition select(headers.ethernet.ether_type) {
//!             0x0800: accept;
//!             default: reject;
//!         }
//!     }
//! }
//! ```
//!
//! The generated entry point is
//! `int fpp_parse_packet(const uint8_t *packet, uint32_t packet_len, packet_hdr_t **out)`.
//! It returns a status code from `enum fpp_errorCodes`; the caller frees every node and
//! payload of the returned list.

pub mod ast;
pub mod builder;
pub mod error;
pub mod extract;
pub mod ir;
pub mod lower;
pub mod model;
pub mod options;
pub mod output;
pub mod parser;
pub mod program;
pub mod resolve;
pub mod state;
pub mod target;
pub mod types;

pub use error::{CompileError, Diagnostics, Error};
pub use options::Options;
pub use output::{output_paths, write_units, OutputError, OutputPaths};
pub use parser::parse;
pub use program::{GeneratedUnits, Program};
pub use resolve::resolve;
pub use target::{target_for, CTarget, CodegenTarget};
pub use types::{FieldType, HasWidth, TypeFactory};

/// Compile `.fpp` source text into both C units.
pub fn compile(source: &str, options: &Options) -> Result<GeneratedUnits, Error> {
    let description = parse(source).map_err(Error::Parse)?;
    let ir = resolve(&description).map_err(Error::Resolve)?;
    let program = Program::build(&ir, options.clone())?;
    Ok(program.generate())
}
