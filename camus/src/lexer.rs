// Hand-written lexer for the surface query grammar (spec's surface
// grammar). Operates line by line the way the teacher's lexer does, so
// `Token::line`/`Token::col` stay meaningful for diagnostics.

use std::fmt;
use std::sync::Arc;

use crate::error::TokenError;

#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Ident(String),
    Number(i128),
    Ipv4(u32),
    Ipv6(u32, u32, u32, u32),
    Mac(u64),
    StringLiteral(String),

    Dot,
    Comma,
    Colon,
    Semicolon,
    Slash,
    Bang,
    AngleOpen,  // <
    AngleClose, // >
    Equals,
    ParenOpen,
    ParenClose,
    LogicalAnd, // &&
    LogicalOr,  // ||

    Eof,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Ident(s) => write!(f, "identifier '{s}'"),
            Kind::Number(n) => write!(f, "number literal '{n}'"),
            Kind::Ipv4(_) => write!(f, "ipv4 literal"),
            Kind::Ipv6(..) => write!(f, "ipv6 literal"),
            Kind::Mac(_) => write!(f, "mac literal"),
            Kind::StringLiteral(s) => write!(f, "string literal \"{s}\""),
            Kind::Dot => write!(f, "'.'"),
            Kind::Comma => write!(f, "','"),
            Kind::Colon => write!(f, "':'"),
            Kind::Semicolon => write!(f, "';'"),
            Kind::Slash => write!(f, "'/'"),
            Kind::Bang => write!(f, "'!'"),
            Kind::AngleOpen => write!(f, "'<'"),
            Kind::AngleClose => write!(f, "'>'"),
            Kind::Equals => write!(f, "'='"),
            Kind::ParenOpen => write!(f, "'('"),
            Kind::ParenClose => write!(f, "')'"),
            Kind::LogicalAnd => write!(f, "'&&'"),
            Kind::LogicalOr => write!(f, "'||'"),
            Kind::Eof => write!(f, "end of file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: Kind,
    pub line: usize,
    pub col: usize,
    pub file: Arc<String>,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line + 1, self.col + 1, self.kind)
    }
}

pub struct Lexer<'a> {
    pub line: usize,
    pub col: usize,
    pub show_tokens: bool,

    lines: Vec<&'a str>,
    cursor: &'a str,
    file: Arc<String>,
}

impl<'a> Lexer<'a> {
    pub fn new(lines: Vec<&'a str>, file: Arc<String>) -> Self {
        let cursor = lines.first().copied().unwrap_or("");
        Self {
            cursor,
            line: 0,
            col: 0,
            lines,
            show_tokens: false,
            file,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Token, TokenError> {
        let token = self.do_next()?;
        if self.show_tokens {
            println!("{token}");
        }
        Ok(token)
    }

    fn do_next(&mut self) -> Result<Token, TokenError> {
        loop {
            self.check_end_of_line();
            if self.at_eof() {
                return Ok(self.here(Kind::Eof));
            }
            if self.skip_whitespace() {
                continue;
            }
            if self.skip_line_comment() {
                continue;
            }
            break;
        }
        if self.at_eof() {
            return Ok(self.here(Kind::Eof));
        }

        let c = self.cursor.chars().next().unwrap();

        if c == '"' {
            return self.scan_string();
        }
        if c.is_ascii_digit() || (c == '-' && self.peek_is_digit_after_sign()) {
            return self.scan_numeric_literal();
        }
        if c.is_ascii_alphabetic() && self.looks_like_mac() {
            return self.scan_mac_literal();
        }
        if (c.is_ascii_hexdigit() || c == ':') && self.looks_like_ipv6() {
            return self.scan_ipv6_literal();
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return self.scan_ident();
        }

        if let Some(t) = self.match_literal("||", Kind::LogicalOr) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal("&&", Kind::LogicalAnd) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal(".", Kind::Dot) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal(",", Kind::Comma) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal(":", Kind::Colon) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal(";", Kind::Semicolon) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal("/", Kind::Slash) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal("!", Kind::Bang) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal("<", Kind::AngleOpen) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal(">", Kind::AngleClose) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal("=", Kind::Equals) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal("(", Kind::ParenOpen) {
            return Ok(t);
        }
        if let Some(t) = self.match_literal(")", Kind::ParenClose) {
            return Ok(t);
        }

        Err(TokenError {
            line: self.line,
            col: self.col,
            len: 1,
            source: self.current_line().to_string(),
            file: self.file.clone(),
        })
    }

    fn here(&self, kind: Kind) -> Token {
        Token {
            kind,
            line: self.line,
            col: self.col,
            file: self.file.clone(),
        }
    }

    fn at_eof(&self) -> bool {
        self.line >= self.lines.len()
    }

    fn current_line(&self) -> &str {
        self.lines.get(self.line).copied().unwrap_or("")
    }

    pub fn line_text(&self, line: usize) -> &str {
        self.lines.get(line).copied().unwrap_or("")
    }

    fn check_end_of_line(&mut self) {
        while self.cursor.is_empty() && self.line < self.lines.len() {
            self.line += 1;
            self.col = 0;
            self.cursor = self.lines.get(self.line).copied().unwrap_or("");
            if self.line >= self.lines.len() {
                break;
            }
        }
    }

    fn advance(&mut self, n: usize) {
        self.cursor = &self.cursor[n..];
        self.col += n;
    }

    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while let Some(c) = self.cursor.chars().next() {
            if !c.is_whitespace() {
                break;
            }
            self.advance(1);
            skipped = true;
            self.check_end_of_line();
        }
        skipped
    }

    fn skip_line_comment(&mut self) -> bool {
        if self.cursor.starts_with("//") {
            self.cursor = "";
            true
        } else {
            false
        }
    }

    fn match_literal(&mut self, text: &str, kind: Kind) -> Option<Token> {
        if self.cursor.starts_with(text) {
            let tok = self.here(kind);
            self.advance(text.len());
            Some(tok)
        } else {
            None
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let len = self
            .cursor
            .char_indices()
            .find(|(_, c)| !pred(*c))
            .map(|(i, _)| i)
            .unwrap_or(self.cursor.len());
        let s = self.cursor[..len].to_string();
        self.advance(len);
        s
    }

    fn scan_ident(&mut self) -> Result<Token, TokenError> {
        let tok_start = self.here(Kind::Eof);
        let s = self.take_while(|c| c.is_alphanumeric() || c == '_');
        Ok(Token {
            kind: Kind::Ident(s),
            ..tok_start
        })
    }

    fn scan_string(&mut self) -> Result<Token, TokenError> {
        let start = self.here(Kind::Eof);
        self.advance(1); // opening quote
        let s = self.take_while(|c| c != '"');
        if !self.cursor.starts_with('"') {
            return Err(TokenError {
                line: start.line,
                col: start.col,
                len: s.len() + 1,
                source: self.current_line().to_string(),
                file: self.file.clone(),
            });
        }
        self.advance(1); // closing quote
        Ok(Token {
            kind: Kind::StringLiteral(s),
            ..start
        })
    }

    fn peek_is_digit_after_sign(&self) -> bool {
        self.cursor
            .chars()
            .nth(1)
            .is_some_and(|c| c.is_ascii_digit())
    }

    /// Scans a NUMBER or an IPV4 literal: digit groups, optionally
    /// dot-separated, where a dot only continues the literal if it is
    /// immediately followed by another digit (so `field.ident` never gets
    /// swallowed here).
    fn scan_numeric_literal(&mut self) -> Result<Token, TokenError> {
        let start = self.here(Kind::Eof);
        let negative = self.cursor.starts_with('-');
        if negative {
            self.advance(1);
        }
        let mut groups = vec![self.take_while(|c| c.is_ascii_digit())];
        while self.cursor.starts_with('.')
            && self.cursor.chars().nth(1).is_some_and(|c| c.is_ascii_digit())
        {
            self.advance(1);
            groups.push(self.take_while(|c| c.is_ascii_digit()));
        }

        if groups.len() == 1 {
            let n: i128 = groups[0].parse().map_err(|_| TokenError {
                line: start.line,
                col: start.col,
                len: groups[0].len(),
                source: self.current_line().to_string(),
                file: self.file.clone(),
            })?;
            return Ok(Token {
                kind: Kind::Number(if negative { -n } else { n }),
                ..start
            });
        }

        if negative || groups.len() != 4 {
            return Err(TokenError {
                line: start.line,
                col: start.col,
                len: groups.iter().map(|g| g.len() + 1).sum(),
                source: self.current_line().to_string(),
                file: self.file.clone(),
            });
        }

        let mut addr: u32 = 0;
        for g in &groups {
            let octet: u32 = g.parse().map_err(|_| TokenError {
                line: start.line,
                col: start.col,
                len: g.len(),
                source: self.current_line().to_string(),
                file: self.file.clone(),
            })?;
            if octet > 255 {
                return Err(TokenError {
                    line: start.line,
                    col: start.col,
                    len: g.len(),
                    source: self.current_line().to_string(),
                    file: self.file.clone(),
                });
            }
            addr = (addr << 8) | octet;
        }
        Ok(Token {
            kind: Kind::Ipv4(addr),
            ..start
        })
    }

    /// Lookahead only: true iff the characters from the cursor up to the
    /// next whitespace/grammar-separator form exactly six 2-digit hex
    /// groups joined by single colons.
    fn looks_like_mac(&self) -> bool {
        let word = self.peek_word();
        let groups: Vec<&str> = word.split(':').collect();
        groups.len() == 6
            && groups
                .iter()
                .all(|g| g.len() == 2 && g.chars().all(|c| c.is_ascii_hexdigit()))
    }

    fn scan_mac_literal(&mut self) -> Result<Token, TokenError> {
        let start = self.here(Kind::Eof);
        let word = self.peek_word();
        self.advance(word.len());
        let mut mac: u64 = 0;
        for g in word.split(':') {
            mac = (mac << 8) | u64::from_str_radix(g, 16).unwrap();
        }
        Ok(Token {
            kind: Kind::Mac(mac),
            ..start
        })
    }

    fn looks_like_ipv6(&self) -> bool {
        let word = self.peek_word();
        word.matches(':').count() >= 2 && parse_ipv6(&word).is_some()
    }

    fn scan_ipv6_literal(&mut self) -> Result<Token, TokenError> {
        let start = self.here(Kind::Eof);
        let word = self.peek_word();
        let limbs = parse_ipv6(&word).ok_or_else(|| TokenError {
            line: start.line,
            col: start.col,
            len: word.len(),
            source: self.current_line().to_string(),
            file: self.file.clone(),
        })?;
        self.advance(word.len());
        Ok(Token {
            kind: Kind::Ipv6(limbs[0], limbs[1], limbs[2], limbs[3]),
            ..start
        })
    }

    /// The maximal run of hex digits and colons starting at the cursor,
    /// without consuming anything.
    fn peek_word(&self) -> String {
        self.cursor
            .chars()
            .take_while(|c| c.is_ascii_hexdigit() || *c == ':')
            .collect()
    }
}

fn parse_ipv6(word: &str) -> Option<[u32; 4]> {
    let (head, tail) = match word.split_once("::") {
        Some((h, t)) => (h, Some(t)),
        None => (word, None),
    };
    let parse_groups = |s: &str| -> Option<Vec<u16>> {
        if s.is_empty() {
            return Some(Vec::new());
        }
        s.split(':')
            .map(|g| u16::from_str_radix(g, 16).ok())
            .collect()
    };
    let mut groups: Vec<u16> = match tail {
        None => {
            let g = parse_groups(head)?;
            if g.len() != 8 {
                return None;
            }
            g
        }
        Some(tail) => {
            let mut h = parse_groups(head)?;
            let t = parse_groups(tail)?;
            if h.len() + t.len() > 8 {
                return None;
            }
            h.resize(8 - t.len(), 0);
            h.extend(t);
            h
        }
    };
    groups.resize(8, 0);
    let limb = |i: usize| -> u32 {
        ((groups[i] as u32) << 16) | groups[i + 1] as u32
    };
    Some([limb(0), limb(2), limb(4), limb(6)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<Kind> {
        let lines: Vec<&str> = src.lines().collect();
        let mut lxr = Lexer::new(lines, Arc::new("t".into()));
        let mut out = Vec::new();
        loop {
            let tok = lxr.next().unwrap();
            let done = tok.kind == Kind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_field_dot_field() {
        let toks = lex_all("ipv4.dstAddr");
        assert_eq!(
            toks,
            vec![
                Kind::Ident("ipv4".into()),
                Kind::Dot,
                Kind::Ident("dstAddr".into()),
                Kind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_ipv4_literal() {
        let toks = lex_all("10.0.0.1");
        assert_eq!(toks, vec![Kind::Ipv4(0x0a00_0001), Kind::Eof]);
    }

    #[test]
    fn lexes_mac_literal() {
        let toks = lex_all("aa:bb:cc:dd:ee:ff");
        assert_eq!(toks, vec![Kind::Mac(0xaabbccddeeff), Kind::Eof]);
    }

    #[test]
    fn lexes_ipv6_literal() {
        let toks = lex_all("::1");
        assert_eq!(toks, vec![Kind::Ipv6(0, 0, 0, 1), Kind::Eof]);
    }

    #[test]
    fn lexes_rule_skeleton() {
        let toks = lex_all("ipv4.dstAddr = 10.0.0.1 : fwd(3) ;");
        assert_eq!(
            toks,
            vec![
                Kind::Ident("ipv4".into()),
                Kind::Dot,
                Kind::Ident("dstAddr".into()),
                Kind::Equals,
                Kind::Ipv4(0x0a00_0001),
                Kind::Colon,
                Kind::Ident("fwd".into()),
                Kind::ParenOpen,
                Kind::Number(3),
                Kind::ParenClose,
                Kind::Semicolon,
                Kind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_lpm_rule() {
        let toks = lex_all("ipv4.dstAddr = 10.0.0.0 / 8 : fwd(2) ;");
        assert!(toks.contains(&Kind::Slash));
        assert!(toks.contains(&Kind::Ipv4(0x0a00_0000)));
    }

    #[test]
    fn lexes_negation_and_logical_ops() {
        let toks = lex_all("!ipv4.proto = 6 && a > 1 || b < 2");
        assert!(toks.contains(&Kind::Bang));
        assert!(toks.contains(&Kind::LogicalAnd));
        assert!(toks.contains(&Kind::LogicalOr));
    }
}
