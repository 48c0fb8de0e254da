//! Generation options.

use crate::model::DEFAULT_FUNCTION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Target language; `None` selects C.
    pub target: Option<String>,
    /// Name of the generated entry point.
    pub function_name: String,
    /// File name the body unit includes the declarations from.
    pub header_file: String,
    /// Source file named in the generated comment.
    pub source_name: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            target: None,
            function_name: DEFAULT_FUNCTION.to_string(),
            header_file: "parser.h".to_string(),
            source_name: None,
        }
    }
}

impl Options {
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }

    pub fn with_header_file(mut self, file: impl Into<String>) -> Self {
        self.header_file = file.into();
        self
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    /// Include guard derived from the header file name, e.g. `PARSER_H`.
    pub fn include_guard(&self) -> String {
        self.header_file
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_setters() {
        let o = Options::default();
        assert_eq!(o.function_name, "fpp_parse_packet");
        assert_eq!(o.include_guard(), "PARSER_H");
        let o = o.with_header_file("out/tunnel-parser.h").with_function_name("parse");
        assert_eq!(o.include_guard(), "OUT_TUNNEL_PARSER_H");
        assert_eq!(o.function_name, "parse");
    }
}
