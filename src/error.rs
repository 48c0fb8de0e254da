//! Generation-time errors.
//!
//! Every error names the construct it was raised for. A run keeps going after an error
//! in one state or type so that all independent problems are reported together; the
//! collected [`Diagnostics`] then fail the run and no output is produced.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("parser {parser}: expected exactly 2 parameters (packet, headers), found {found}")]
    WrongArity { parser: String, found: usize },
    #[error("unsupported type {ty}{location}: {reason}", location = in_field(.field))]
    UnsupportedType {
        ty: String,
        field: Option<String>,
        reason: String,
    },
    #[error("state {state}: unknown name {name}")]
    UnresolvedName { state: String, name: String },
    #[error("state {state}: {reason}")]
    UnsupportedSelect { state: String, reason: String },
    #[error("state {state}: select has more than one default case")]
    DuplicateDefault { state: String },
    #[error("state {state}: {reason}")]
    UnsupportedLookahead { state: String, reason: String },
    #[error("state {state}: cannot extract {expr}: {reason}")]
    UnsupportedExtract {
        state: String,
        expr: String,
        reason: String,
    },
    #[error("state {state}: unsupported expression {expr}: {reason}")]
    UnsupportedExpression {
        state: String,
        expr: String,
        reason: String,
    },
    #[error("state {state}: entered at bit {first} of a byte on one path and at bit {second} on another")]
    ConflictingAlignment { state: String, first: u32, second: u32 },
    #[error("state {state}: transition to unknown state {target}")]
    UnknownState { state: String, target: String },
    #[error("parser {parser} declares no states")]
    NoStates { parser: String },
    #[error("could not locate a top-level parser; is there a parser declaration?")]
    MissingEntry,
    #[error("unknown target {0}")]
    UnknownTarget(String),
}

fn in_field(field: &Option<String>) -> String {
    match field {
        Some(f) => format!(" in field {}", f),
        None => String::new(),
    }
}

/// All errors reported during one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error. Each error is logged once, when it is recorded.
    pub fn report(&mut self, error: CompileError) {
        tracing::error!("{}", error);
        self.errors.push(error);
    }

    /// Record the error of a failed step and return its success value, if any.
    pub fn check<T>(&mut self, result: Result<T, CompileError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.report(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    /// `Ok(value)` when nothing was reported, otherwise all reported errors.
    pub fn finish<T>(self, value: T) -> Result<T, Diagnostics> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl From<CompileError> for Diagnostics {
    fn from(error: CompileError) -> Self {
        let mut d = Diagnostics::new();
        d.report(error);
        d
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "error: {}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

/// Failure of a whole source-to-C run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Resolve(String),
    #[error("{0}")]
    Generate(#[from] Diagnostics),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_type_names_field() {
        let e = CompileError::UnsupportedType {
            ty: "varbit<32>".into(),
            field: Some("options".into()),
            reason: "variable-length fields are not supported".into(),
        };
        assert_eq!(
            e.to_string(),
            "unsupported type varbit<32> in field options: variable-length fields are not supported"
        );
    }

    #[test]
    fn diagnostics_collect_all_errors() {
        let mut d = Diagnostics::new();
        assert!(d.check::<()>(Err(CompileError::MissingEntry)).is_none());
        d.report(CompileError::UnknownTarget("ebpf".into()));
        assert_eq!(d.len(), 2);
        let text = d.clone().to_string();
        assert!(text.contains("top-level parser"));
        assert!(text.contains("unknown target ebpf"));
        assert!(d.finish(()).is_err());
    }

    #[test]
    fn run_errors_display_their_cause() {
        let e = Error::from(Diagnostics::from(CompileError::MissingEntry));
        assert!(e.to_string().starts_with("error: could not locate"));
        assert_eq!(Error::Resolve("unknown type h_t".into()).to_string(), "unknown type h_t");
    }

    #[test]
    fn empty_diagnostics_finish_ok() {
        assert_eq!(Diagnostics::new().finish(7), Ok(7));
    }
}
