//! Source locations

use std::fmt;
use std::sync::Arc;

use rqbs_parser::Span;

/// A position in a source file, 1-based
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CodeLocation {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl CodeLocation {
    pub fn new(file: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.file.is_empty()
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.file)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

/// Maps byte offsets of one source text to line/column pairs
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .char_indices()
                .filter(|&(_, c)| c == '\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    /// 1-based line and column of a byte offset
    pub fn line_column(&self, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let column = offset - self.line_starts[line];
        (line as u32 + 1, column as u32 + 1)
    }

    pub fn location(&self, file: &Arc<str>, span: Span) -> CodeLocation {
        let (line, column) = self.line_column(span.start);
        CodeLocation {
            file: Arc::clone(file),
            line,
            column,
        }
    }
}
