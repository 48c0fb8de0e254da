//! Structured text builder for generated C.
//!
//! Tracks the indentation level and block nesting so emitters only say what to write,
//! never how many spaces precede it.

const INDENT: &str = "    ";

#[derive(Debug, Default, Clone)]
pub struct CodeBuilder {
    output: String,
    indent: usize,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, s: &str) {
        self.output.push_str(s);
    }

    pub fn emit_indent(&mut self) {
        for _ in 0..self.indent {
            self.output.push_str(INDENT);
        }
    }

    /// Indented line followed by a newline. An empty string produces a bare newline.
    pub fn append_line(&mut self, s: &str) {
        if !s.is_empty() {
            self.emit_indent();
            self.output.push_str(s);
        }
        self.output.push('\n');
    }

    pub fn newline(&mut self) {
        self.output.push('\n');
    }

    pub fn space(&mut self) {
        self.output.push(' ');
    }

    /// `{` and a newline; subsequent lines are indented one level deeper.
    pub fn block_start(&mut self) {
        self.output.push_str("{\n");
        self.indent += 1;
    }

    /// Closing `}` at the enclosing level, optionally ending the line.
    pub fn block_end(&mut self, end_line: bool) {
        debug_assert!(self.indent > 0, "block_end without block_start");
        self.indent = self.indent.saturating_sub(1);
        self.emit_indent();
        self.output.push('}');
        if end_line {
            self.output.push('\n');
        }
    }

    pub fn end_of_statement(&mut self, end_line: bool) {
        self.output.push(';');
        if end_line {
            self.output.push('\n');
        }
    }

    /// Indented statement: `s;` and a newline.
    pub fn statement(&mut self, s: &str) {
        self.emit_indent();
        self.output.push_str(s);
        self.end_of_statement(true);
    }

    pub fn increase_indent(&mut self) {
        self.indent += 1;
    }

    pub fn finish(self) -> String {
        self.output
    }
}
