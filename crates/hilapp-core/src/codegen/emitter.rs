/// Emitter collects generated C++ text with indentation.
pub struct Emitter {
    pub output: String,
    indent_level: usize,
    indent_str: String,
}

impl Emitter {
    pub fn new() -> Self {
        Self {
            output: String::new(),
            indent_level: 0,
            indent_str: "    ".to_string(),
        }
    }

    pub fn write(&mut self, s: &str) {
        self.output.push_str(s);
    }

    pub fn writeln(&mut self, s: &str) {
        self.output.push_str(s);
        self.output.push('\n');
    }

    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        if self.indent_level > 0 {
            self.indent_level -= 1;
        }
    }

    pub fn write_indent(&mut self) {
        for _ in 0..self.indent_level {
            self.output.push_str(&self.indent_str);
        }
    }

    pub fn write_indented(&mut self, s: &str) {
        self.write_indent();
        self.writeln(s);
    }

    /// Opens a `{` block on its own line.
    pub fn open(&mut self, s: &str) {
        self.write_indented(s);
        self.indent();
    }

    pub fn close(&mut self, s: &str) {
        self.dedent();
        self.write_indented(s);
    }

    /// Writes source text that spans several lines. The first line is
    /// indented; later lines keep the indentation they have in the source.
    pub fn write_source(&mut self, text: &str) {
        self.write_indent();
        self.writeln(text.trim_end());
    }

    /// Writes `text` as line comments, prefixing every line with `prefix`.
    pub fn write_commented(&mut self, prefix: &str, text: &str) {
        for line in text.lines() {
            self.write_indent();
            self.write(prefix);
            self.writeln(line.trim_end());
        }
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_and_comments() {
        let mut e = Emitter::new();
        e.open("{");
        e.write_indented("int a = 1;");
        e.write_commented("//-- ", "a\n  b\n");
        e.close("}");
        assert_eq!(e.take_output(), "{\n    int a = 1;\n    //-- a\n    //--   b\n}\n");
        assert!(e.output.is_empty());
    }
}
