//! Tokenizer for PHP source, reduced to what declaration discovery needs.
//!
//! Strings, heredocs, comments and attributes are consumed whole so that
//! braces and keywords inside them never reach the parser. Inline HTML
//! outside `<?php ... ?>` is dropped; a closing tag acts as `;`.

use super::ParseError;

/// Token kinds seen by the declaration parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    /// Identifier or (qualified) name, e.g. `class`, `Foo`, `\App\Foo`.
    Name(String),
    Variable,
    Literal,
    /// A complete `#[...]` attribute group.
    Attribute,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semi,
    /// A lone `:`; opens an alternative-syntax control block after a
    /// condition.
    Colon,
    DoubleColon,
    Op,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: Tok,
    pub line: u32,
}

/// Lexes a whole file.
///
/// The returned vector always ends with [`Tok::Eof`].
pub fn lex(source: &[u8]) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        src: source,
        pos: 0,
        line: 1,
    };
    lexer.lex_all()
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

impl<'a> Lexer<'a> {
    fn lex_all(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        self.skip_inline_html();
        loop {
            self.skip_trivia()?;
            if self.pos >= self.src.len() {
                tokens.push(Token {
                    kind: Tok::Eof,
                    line: self.line,
                });
                return Ok(tokens);
            }
            let line = self.line;
            let kind = self.next_token()?;
            // Everything after `__halt_compiler` is raw data.
            let halt = matches!(&kind, Tok::Name(n) if n.eq_ignore_ascii_case("__halt_compiler"));
            tokens.push(Token { kind, line });
            if halt {
                tokens.push(Token {
                    kind: Tok::Eof,
                    line: self.line,
                });
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        self.src.get(self.pos + offset).copied().unwrap_or(0)
    }

    fn starts_with(&self, s: &[u8]) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn starts_with_ignore_case(&self, s: &[u8]) -> bool {
        self.src.len() - self.pos >= s.len()
            && self.src[self.pos..self.pos + s.len()].eq_ignore_ascii_case(s)
    }

    fn bump(&mut self) -> u8 {
        let b = self.src[self.pos];
        if b == b'\n' {
            self.line += 1;
        }
        self.pos += 1;
        b
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn error(&self, line: u32, message: impl Into<String>) -> ParseError {
        ParseError {
            line,
            message: message.into(),
        }
    }

    /// Skips text up to and including the next open tag.
    fn skip_inline_html(&mut self) {
        while self.pos < self.src.len() {
            if self.starts_with(b"<?") {
                if self.starts_with_ignore_case(b"<?php") {
                    self.bump_n(5);
                } else if self.starts_with(b"<?=") {
                    self.bump_n(3);
                } else {
                    self.bump_n(2);
                }
                return;
            }
            self.bump();
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' | 0x0c => {
                    self.bump();
                }
                b'#' if self.peek_at(1) != b'[' => self.skip_line_comment(),
                b'/' if self.peek_at(1) == b'/' => self.skip_line_comment(),
                b'/' if self.peek_at(1) == b'*' => {
                    let line = self.line;
                    self.bump_n(2);
                    loop {
                        if self.pos >= self.src.len() {
                            return Err(self.error(line, "unterminated comment"));
                        }
                        if self.starts_with(b"*/") {
                            self.bump_n(2);
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Line comments end at a newline or just before a closing tag.
    fn skip_line_comment(&mut self) {
        while self.pos < self.src.len() {
            if self.peek() == b'\n' || self.starts_with(b"?>") {
                return;
            }
            self.bump();
        }
    }

    fn next_token(&mut self) -> Result<Tok, ParseError> {
        let line = self.line;
        let b = self.peek();

        if self.starts_with(b"?>") {
            self.bump_n(2);
            self.skip_inline_html();
            return Ok(Tok::Semi);
        }
        if self.starts_with(b"#[") {
            self.bump_n(2);
            self.skip_group(b'[', b']', line)?;
            return Ok(Tok::Attribute);
        }
        if self.starts_with(b"<<<") {
            return self.heredoc(line);
        }
        if is_name_start(b) || (b == b'\\' && is_name_start(self.peek_at(1))) {
            return Ok(Tok::Name(self.name()));
        }

        match b {
            b'$' => {
                self.bump();
                while is_name_char(self.peek()) {
                    self.bump();
                }
                Ok(Tok::Variable)
            }
            b'\'' => {
                self.bump();
                self.single_quoted(line)?;
                Ok(Tok::Literal)
            }
            b'"' | b'`' => {
                self.bump();
                self.interpolated(b, line)?;
                Ok(Tok::Literal)
            }
            b'0'..=b'9' => {
                while is_name_char(self.peek()) || self.peek() == b'.' {
                    self.bump();
                }
                Ok(Tok::Literal)
            }
            b'.' if self.peek_at(1).is_ascii_digit() => {
                self.bump();
                while is_name_char(self.peek()) {
                    self.bump();
                }
                Ok(Tok::Literal)
            }
            b':' if self.peek_at(1) == b':' => {
                self.bump_n(2);
                Ok(Tok::DoubleColon)
            }
            _ => {
                self.bump();
                Ok(match b {
                    b'{' => Tok::LBrace,
                    b'}' => Tok::RBrace,
                    b'(' => Tok::LParen,
                    b')' => Tok::RParen,
                    b'[' => Tok::LBracket,
                    b']' => Tok::RBracket,
                    b';' => Tok::Semi,
                    b':' => Tok::Colon,
                    _ => Tok::Op,
                })
            }
        }
    }

    /// Reads a name, joining `\`-separated segments into one token.
    fn name(&mut self) -> String {
        let start = self.pos;
        if self.peek() == b'\\' {
            self.bump();
        }
        loop {
            while is_name_char(self.peek()) {
                self.bump();
            }
            if self.peek() == b'\\' && is_name_start(self.peek_at(1)) {
                self.bump();
                continue;
            }
            break;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn single_quoted(&mut self, line: u32) -> Result<(), ParseError> {
        loop {
            if self.pos >= self.src.len() {
                return Err(self.error(line, "unterminated string literal"));
            }
            match self.bump() {
                b'\\' if self.pos < self.src.len() => {
                    self.bump();
                }
                b'\'' => return Ok(()),
                _ => {}
            }
        }
    }

    /// Double-quoted or backtick string, including `{$...}` / `${...}`
    /// interpolations which may themselves contain quoted strings.
    fn interpolated(&mut self, quote: u8, line: u32) -> Result<(), ParseError> {
        loop {
            if self.pos >= self.src.len() {
                return Err(self.error(line, "unterminated string literal"));
            }
            if (self.peek() == b'{' && self.peek_at(1) == b'$')
                || (self.peek() == b'$' && self.peek_at(1) == b'{')
            {
                if self.peek() == b'$' {
                    self.bump();
                }
                self.bump();
                self.skip_group(b'{', b'}', line)?;
                continue;
            }
            match self.bump() {
                b'\\' if self.pos < self.src.len() => {
                    self.bump();
                }
                b if b == quote => return Ok(()),
                _ => {}
            }
        }
    }

    /// Skips up to the `close` matching an already consumed `open`.
    fn skip_group(&mut self, open: u8, close: u8, line: u32) -> Result<(), ParseError> {
        let mut depth = 1usize;
        loop {
            if self.pos >= self.src.len() {
                return Err(self.error(line, format!("unclosed `{}`", open as char)));
            }
            let b = self.bump();
            match b {
                b'\'' => self.single_quoted(self.line)?,
                b'"' => self.interpolated(b'"', self.line)?,
                _ if b == open => depth += 1,
                _ if b == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    /// `<<<ID`, `<<<"ID"` or `<<<'ID'` up to the closing identifier.
    fn heredoc(&mut self, line: u32) -> Result<Tok, ParseError> {
        self.bump_n(3);
        while matches!(self.peek(), b' ' | b'\t') {
            self.bump();
        }
        let quote = match self.peek() {
            q @ (b'"' | b'\'') => {
                self.bump();
                Some(q)
            }
            _ => None,
        };
        let start = self.pos;
        while is_name_char(self.peek()) {
            self.bump();
        }
        let label = self.src[start..self.pos].to_vec();
        if label.is_empty() {
            return Err(self.error(line, "heredoc without label"));
        }
        if let Some(q) = quote {
            if self.peek() != q {
                return Err(self.error(line, "malformed heredoc label"));
            }
            self.bump();
        }

        // Body ends at a line whose first non-blank text is the label,
        // not followed by another name character.
        loop {
            while self.pos < self.src.len() && self.peek() != b'\n' {
                self.bump();
            }
            if self.pos >= self.src.len() {
                return Err(self.error(line, "unterminated heredoc"));
            }
            self.bump();
            while matches!(self.peek(), b' ' | b'\t') {
                self.bump();
            }
            if self.starts_with(&label) && !is_name_char(self.peek_at(label.len())) {
                self.bump_n(label.len());
                return Ok(Tok::Literal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        lex(src.as_bytes())
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn names(src: &str) -> Vec<String> {
        kinds(src)
            .into_iter()
            .filter_map(|k| match k {
                Tok::Name(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn inline_html_is_dropped() {
        assert_eq!(names("<html>class Nope</html><?php class Yes {}"), vec!["class", "Yes"]);
    }

    #[test]
    fn qualified_names_are_single_tokens() {
        assert_eq!(
            names("<?php use \\App\\Models\\User; namespace\\f();"),
            vec!["use", "\\App\\Models\\User", "namespace\\f"]
        );
    }

    #[test]
    fn strings_and_comments_hide_keywords() {
        let src = r#"<?php
            // class A {}
            # class B {}
            /* class C { */
            $x = 'class D {';
            $y = "class E { {$arr["k"]} ${z}";
            $h = <<<EOT
              class F {
              EOT;
            $n = <<<'RAW'
            }}}
            RAW;
        "#;
        assert!(!names(src).iter().any(|n| n == "class"));
    }

    #[test]
    fn attribute_is_one_token() {
        assert_eq!(
            kinds("<?php #[Route('/x', methods: ['GET'])] class A {}"),
            vec![
                Tok::Attribute,
                Tok::Name("class".into()),
                Tok::Name("A".into()),
                Tok::LBrace,
                Tok::RBrace,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn close_tag_acts_as_semicolon() {
        assert_eq!(
            kinds("<?php foo() ?><p>x</p><?php bar();"),
            vec![
                Tok::Name("foo".into()),
                Tok::LParen,
                Tok::RParen,
                Tok::Semi,
                Tok::Name("bar".into()),
                Tok::LParen,
                Tok::RParen,
                Tok::Semi,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_line() {
        let err = lex(b"<?php\n\n$x = 'abc").unwrap_err();
        assert_eq!(err.line, 3);
    }
}
