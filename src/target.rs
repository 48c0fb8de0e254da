//! Output languages.

use crate::builder::CodeBuilder;
use crate::error::CompileError;

/// A language the generated parser can be written in.
pub trait CodegenTarget {
    fn name(&self) -> &'static str;
    /// Includes needed by the declarations unit.
    fn emit_includes(&self, builder: &mut CodeBuilder);
    fn header_extension(&self) -> &'static str;
    fn source_extension(&self) -> &'static str;
}

/// Portable C99 with POSIX byte-order functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CTarget;

impl CodegenTarget for CTarget {
    fn name(&self) -> &'static str {
        "c"
    }

    fn emit_includes(&self, builder: &mut CodeBuilder) {
        for header in ["stdint.h", "stdlib.h", "string.h", "arpa/inet.h"] {
            builder.append_line(&format!("#include <{}>", header));
        }
    }

    fn header_extension(&self) -> &'static str {
        "h"
    }

    fn source_extension(&self) -> &'static str {
        "c"
    }
}

/// Look up a target by name; `None` selects C.
pub fn target_for(name: Option<&str>) -> Result<Box<dyn CodegenTarget>, CompileError> {
    match name {
        None => Ok(Box::new(CTarget)),
        Some(n) if n.eq_ignore_ascii_case("c") => Ok(Box::new(CTarget)),
        Some(other) => Err(CompileError::UnknownTarget(other.to_string())),
    }
}
