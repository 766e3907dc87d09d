use std::fmt;
use std::sync::Arc;

use colored::Colorize;

use crate::lexer::{Kind, Token};

#[derive(Debug)]
pub struct SemanticError {
    /// Token where the error was encountered.
    pub at: Token,

    /// Message associated with this error.
    pub message: String,

    /// The source line the error occurred on.
    pub source: String,
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_common(&self.at, &self.message, &self.source, 1, f)
    }
}

impl std::error::Error for SemanticError {}

#[derive(Debug)]
pub struct ParserError {
    /// Token where the error was encountered.
    pub at: Token,

    /// Message associated with this error.
    pub message: String,

    /// The source line the error occurred on.
    pub source: String,
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_common(&self.at, &self.message, &self.source, 1, f)
    }
}

impl std::error::Error for ParserError {}

#[derive(Debug)]
pub struct TokenError {
    /// Line where the token error was encountered.
    pub line: usize,

    /// Column where the token error was encountered.
    pub col: usize,

    /// Length of the erroneous token.
    pub len: usize,

    /// The source line the token error occurred on.
    pub source: String,

    /// The source file where the token error was encountered.
    pub file: Arc<String>,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = Token {
            kind: Kind::Eof,
            line: self.line,
            col: self.col,
            file: self.file.clone(),
        };
        fmt_common(&at, "unrecognized token", &self.source, self.len, f)
    }
}

impl std::error::Error for TokenError {}

#[derive(Debug)]
pub enum Error {
    Lexer(TokenError),
    Parser(ParserError),
    Semantic(Vec<SemanticError>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lexer(e) => e.fmt(f),
            Self::Parser(e) => e.fmt(f),
            Self::Semantic(errors) => {
                for e in &errors[..errors.len() - 1] {
                    e.fmt(f)?;
                    writeln!(f)?;
                }
                errors[errors.len() - 1].fmt(f)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<TokenError> for Error {
    fn from(e: TokenError) -> Self {
        Self::Lexer(e)
    }
}

impl From<ParserError> for Error {
    fn from(e: ParserError) -> Self {
        Self::Parser(e)
    }
}

impl From<Vec<SemanticError>> for Error {
    fn from(e: Vec<SemanticError>) -> Self {
        Self::Semantic(e)
    }
}

/// Non-fatal compilation diagnostics, modeled on `p4::check::Diagnostics`.
/// Unlike the token-carrying errors above, these are produced by
/// `camus::compile` after rule resolution has already folded the AST's
/// tokens away, so a diagnostic here carries a level and a message only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            Level::Info => "info".cyan(),
            Level::Warning => "warning".yellow(),
        };
        write!(f, "{}: {}", tag, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: Level, message: impl Into<String>) {
        self.0.push(Diagnostic {
            level,
            message: message.into(),
        });
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn carat_line(line: &str, at: &Token, len: usize) -> String {
    // The presence of tabs makes presenting error indicators purely based
    // on column position impossible, so here we iterate over the existing
    // string and mask out the non-whitespace text, inserting the error
    // indicators and preserving any tab/space mixture.
    let mut carat_line = String::new();
    let col = at.col.min(line.len());
    for x in line[..col].chars() {
        if x.is_whitespace() {
            carat_line.push(x);
        } else {
            carat_line.push(' ');
        }
    }
    let remaining = line[col..].chars().count().max(1);
    for _ in 0..len.min(remaining) {
        carat_line.push('^');
    }
    carat_line
}

fn fmt_common(
    at: &Token,
    message: &str,
    source: &str,
    len: usize,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    let loc = format!("[{}:{}]", at.line + 1, at.col + 1)
        .as_str()
        .bright_red();
    writeln!(
        f,
        "{}: {}\n{} {}\n",
        "error".bright_red(),
        message.bright_white().bold(),
        loc,
        *at.file,
    )?;
    writeln!(f, "  {source}")?;

    let carat_line = carat_line(source, at, len);
    write!(f, "  {}", carat_line.bright_red())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_accumulate_in_push_order() {
        let mut diags = Diagnostics::new();
        assert!(diags.is_empty());
        diags.push(Level::Info, "first");
        diags.push(Level::Warning, "second");
        let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(diags.0[0].level, Level::Info);
        assert_eq!(diags.0[1].level, Level::Warning);
    }
}
