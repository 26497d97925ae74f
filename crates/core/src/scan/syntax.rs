//! Statement-level syntax tree for a PHP file.
//!
//! Only the top level is modelled: namespaces, named type declarations and
//! "everything else". Bodies of functions, classes and control-flow blocks
//! are skipped as balanced token groups and never parsed.

use super::lexer::{Tok, Token};
use super::ParseError;
use crate::model::TypeKind;

/// A top-level statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// `namespace A\B;` (owning the statements up to the next namespace)
    /// or `namespace A\B { ... }`. `name` is `None` for `namespace { ... }`.
    Namespace {
        /// Namespace name without a leading `\`.
        name: Option<String>,
        /// Statements inside the namespace.
        body: Vec<Stmt>,
        /// Line of the `namespace` keyword.
        line: u32,
    },
    /// A named class, interface, trait or enum declaration.
    Type {
        /// Declaration keyword.
        kind: TypeKind,
        /// Unqualified type name.
        name: String,
        /// Line the declaration starts on.
        line: u32,
    },
    /// Anything that declares no type.
    Other,
}

/// Parses a token stream into top-level statements.
pub fn parse(tokens: &[Token]) -> Result<Vec<Stmt>, ParseError> {
    let mut p = Parser { tokens, pos: 0 };
    p.statements(false)
}

enum Item {
    /// Statement-form namespace; claims the statements that follow it.
    Header { name: String, line: u32 },
    Stmt(Stmt),
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

fn keyword(name: &str, kw: &str) -> bool {
    name.eq_ignore_ascii_case(kw)
}

fn is_modifier(name: &str) -> bool {
    keyword(name, "abstract") || keyword(name, "final") || keyword(name, "readonly")
}

/// Control statements that accept `:` ... `end<kw>;` alternative syntax.
fn alt_opener(name: &str) -> bool {
    ["if", "while", "for", "foreach", "switch", "declare"]
        .iter()
        .any(|kw| keyword(name, kw))
}

fn alt_closer(name: &str) -> bool {
    ["endif", "endwhile", "endfor", "endforeach", "endswitch", "enddeclare"]
        .iter()
        .any(|kw| keyword(name, kw))
}

fn type_keyword(name: &str) -> Option<TypeKind> {
    if keyword(name, "class") {
        Some(TypeKind::Class)
    } else if keyword(name, "interface") {
        Some(TypeKind::Interface)
    } else if keyword(name, "trait") {
        Some(TypeKind::Trait)
    } else if keyword(name, "enum") {
        Some(TypeKind::Enum)
    } else {
        None
    }
}

impl<'t> Parser<'t> {
    fn peek(&self) -> &'t Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &'t Token {
        let tokens = self.tokens;
        &tokens[(self.pos + offset).min(tokens.len() - 1)]
    }

    /// Advances past the current token. The trailing `Eof` is never passed.
    fn bump(&mut self) -> &'t Token {
        let tok = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.peek().line,
            message: message.into(),
        }
    }

    /// Parses statements until end of file, or until the `}` closing the
    /// current block when `in_block` is set.
    fn statements(&mut self, in_block: bool) -> Result<Vec<Stmt>, ParseError> {
        let mut items = Vec::new();
        loop {
            match self.peek().kind {
                Tok::Eof if in_block => {
                    return Err(self.error("unexpected end of file, expected `}`"))
                }
                Tok::Eof => break,
                Tok::RBrace if in_block => {
                    self.bump();
                    break;
                }
                Tok::RBrace => return Err(self.error("unmatched `}`")),
                _ => items.push(self.statement()?),
            }
        }
        Ok(fold_namespaces(items))
    }

    fn statement(&mut self) -> Result<Item, ParseError> {
        let tok = self.peek().clone();
        match &tok.kind {
            Tok::Attribute => {
                self.bump();
                if matches!(self.peek().kind, Tok::Eof | Tok::RBrace) {
                    return Ok(Item::Stmt(Stmt::Other));
                }
                self.statement()
            }
            Tok::Name(n) if keyword(n, "namespace") => self.namespace(),
            Tok::Name(n) if keyword(n, "__halt_compiler") => {
                self.pos = self.tokens.len() - 1;
                Ok(Item::Stmt(Stmt::Other))
            }
            // `enum` is only a keyword when a name follows it.
            Tok::Name(n) if keyword(n, "enum") => match self.peek_at(1).kind {
                Tok::Name(_) => self.type_decl(),
                _ => {
                    self.skip_statement()?;
                    Ok(Item::Stmt(Stmt::Other))
                }
            },
            Tok::Name(n) if type_keyword(n).is_some() => self.type_decl(),
            // `readonly(...)` is a plain function call.
            Tok::Name(n) if is_modifier(n) && self.modifiers_lead_to_type() => self.type_decl(),
            _ => {
                self.skip_statement()?;
                Ok(Item::Stmt(Stmt::Other))
            }
        }
    }

    fn namespace(&mut self) -> Result<Item, ParseError> {
        let line = self.bump().line;
        match self.peek().kind.clone() {
            Tok::Name(name) => {
                self.bump();
                let name = name.trim_start_matches('\\').to_string();
                match self.peek().kind {
                    Tok::Semi => {
                        self.bump();
                        Ok(Item::Header { name, line })
                    }
                    Tok::LBrace => {
                        self.bump();
                        let body = self.statements(true)?;
                        Ok(Item::Stmt(Stmt::Namespace {
                            name: Some(name),
                            body,
                            line,
                        }))
                    }
                    _ => Err(self.error("expected `;` or `{` after namespace name")),
                }
            }
            Tok::LBrace => {
                self.bump();
                let body = self.statements(true)?;
                Ok(Item::Stmt(Stmt::Namespace {
                    name: None,
                    body,
                    line,
                }))
            }
            _ => Err(self.error("expected namespace name")),
        }
    }

    /// Whether the modifiers at the cursor are followed by a type keyword.
    fn modifiers_lead_to_type(&self) -> bool {
        let mut offset = 0;
        loop {
            match &self.peek_at(offset).kind {
                Tok::Name(n) if is_modifier(n) => offset += 1,
                Tok::Name(n) => return type_keyword(n).is_some(),
                _ => return false,
            }
        }
    }

    fn type_decl(&mut self) -> Result<Item, ParseError> {
        let line = self.peek().line;
        let kind = loop {
            match &self.bump().kind {
                Tok::Name(n) if is_modifier(n) => continue,
                Tok::Name(n) => match type_keyword(n) {
                    Some(kind) => break kind,
                    None => return Err(self.error(format!("unexpected `{n}` after modifier"))),
                },
                _ => return Err(self.error("expected class declaration after modifier")),
            }
        };
        let name = match &self.peek().kind {
            Tok::Name(n) if !n.contains('\\') => n.clone(),
            _ => return Err(self.error(format!("expected {kind} name"))),
        };
        self.bump();

        // extends / implements / enum backing type, up to the body.
        loop {
            match self.peek().kind {
                Tok::LBrace => break,
                Tok::LParen | Tok::LBracket => self.skip_group()?,
                Tok::Eof | Tok::Semi | Tok::RBrace => {
                    return Err(self.error(format!("expected `{{` to open body of {name}")))
                }
                _ => {
                    self.bump();
                }
            }
        }
        self.skip_group()?;
        Ok(Item::Stmt(Stmt::Type { kind, name, line }))
    }

    /// Skips one statement that declares nothing visible at this level.
    ///
    /// Ends after a `;` at nesting depth zero, or after a brace block at
    /// depth zero (function bodies, control flow). A `}` at depth zero is
    /// left for the enclosing block.
    fn skip_statement(&mut self) -> Result<(), ParseError> {
        if let Tok::Name(n) = &self.peek().kind {
            if alt_opener(n) && self.peek_at(1).kind == Tok::LParen {
                self.bump();
                self.skip_group()?;
                if self.peek().kind == Tok::Colon {
                    self.bump();
                    return self.skip_alt_block();
                }
            }
        }
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                Tok::Eof if depth == 0 => return Ok(()),
                Tok::Eof => return Err(self.error("unexpected end of file inside expression")),
                Tok::Semi if depth == 0 => {
                    self.bump();
                    return Ok(());
                }
                Tok::LParen | Tok::LBracket => {
                    depth += 1;
                    self.bump();
                }
                Tok::RParen | Tok::RBracket => {
                    if depth == 0 {
                        return Err(self.error("unmatched closing bracket"));
                    }
                    depth -= 1;
                    self.bump();
                }
                Tok::LBrace => {
                    self.skip_group()?;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Tok::RBrace if depth == 0 => return Ok(()),
                Tok::RBrace => return Err(self.error("unexpected `}` inside expression")),
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// Skips the body of an alternative-syntax block, just past its `:`, up
    /// to and including the matching `end<kw>;`.
    fn skip_alt_block(&mut self) -> Result<(), ParseError> {
        let mut depth = 1usize;
        loop {
            match &self.peek().kind {
                Tok::Eof => return Err(self.error("unexpected end of file, unclosed control block")),
                Tok::Name(n) if alt_closer(n) => {
                    self.bump();
                    depth -= 1;
                    if depth == 0 {
                        if self.peek().kind == Tok::Semi {
                            self.bump();
                        }
                        return Ok(());
                    }
                }
                Tok::Name(n) if alt_opener(n) && self.peek_at(1).kind == Tok::LParen => {
                    self.bump();
                    self.skip_group()?;
                    if self.peek().kind == Tok::Colon {
                        self.bump();
                        depth += 1;
                    }
                }
                Tok::LBrace | Tok::LParen | Tok::LBracket => self.skip_group()?,
                Tok::RBrace | Tok::RParen | Tok::RBracket => {
                    return Err(self.error("unexpected closing delimiter in control block"))
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// Skips a balanced `{...}`, `(...)` or `[...]` group starting at the
    /// current token.
    fn skip_group(&mut self) -> Result<(), ParseError> {
        let mut stack = Vec::new();
        loop {
            let tok = self.peek().clone();
            match tok.kind {
                Tok::LBrace => stack.push(Tok::RBrace),
                Tok::LParen => stack.push(Tok::RParen),
                Tok::LBracket => stack.push(Tok::RBracket),
                Tok::RBrace | Tok::RParen | Tok::RBracket => {
                    if stack.pop().as_ref() != Some(&tok.kind) {
                        return Err(self.error("mismatched closing delimiter"));
                    }
                }
                Tok::Eof => return Err(self.error("unexpected end of file, unclosed block")),
                _ => {}
            }
            self.bump();
            if stack.is_empty() {
                return Ok(());
            }
        }
    }
}

/// Moves statements following a statement-form namespace into its body.
///
/// A block namespace also closes any open statement-form namespace.
fn fold_namespaces(items: Vec<Item>) -> Vec<Stmt> {
    let mut out = Vec::new();
    let mut open: Option<(String, u32, Vec<Stmt>)> = None;

    let close = |open: &mut Option<(String, u32, Vec<Stmt>)>, out: &mut Vec<Stmt>| {
        if let Some((name, line, body)) = open.take() {
            out.push(Stmt::Namespace {
                name: Some(name),
                body,
                line,
            });
        }
    };

    for item in items {
        match item {
            Item::Header { name, line } => {
                close(&mut open, &mut out);
                open = Some((name, line, Vec::new()));
            }
            Item::Stmt(stmt @ Stmt::Namespace { .. }) => {
                close(&mut open, &mut out);
                out.push(stmt);
            }
            Item::Stmt(stmt) => match &mut open {
                Some((_, _, body)) => body.push(stmt),
                None => out.push(stmt),
            },
        }
    }
    close(&mut open, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::lexer::lex;

    fn parse_src(src: &str) -> Result<Vec<Stmt>, ParseError> {
        parse(&lex(src.as_bytes())?)
    }

    fn types(stmts: &[Stmt]) -> Vec<String> {
        stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::Type { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn statement_namespace_owns_following_statements() {
        let stmts = parse_src("<?php namespace A; class X {} namespace B; interface Y {}").unwrap();
        assert_eq!(stmts.len(), 2);
        match &stmts[1] {
            Stmt::Namespace { name, body, .. } => {
                assert_eq!(name.as_deref(), Some("B"));
                assert_eq!(types(body), vec!["Y"]);
            }
            other => panic!("expected namespace, got {other:?}"),
        }
    }

    #[test]
    fn modifiers_and_headers_are_accepted() {
        let src = r#"<?php
            #[Attr]
            final readonly class A extends B implements C, D {}
            abstract class E { public function f() { return new class {}; } }
            enum Suit: string implements HasLabel { case Hearts = 'H'; }
        "#;
        let stmts = parse_src(src).unwrap();
        assert_eq!(types(&stmts), vec!["A", "E", "Suit"]);
    }

    #[test]
    fn nested_and_anonymous_declarations_are_not_top_level() {
        let src = r#"<?php
            function make() { class Inner {} return 1; }
            $f = function () { interface Hidden {} };
            if (true) { trait Conditional {} }
            $o = new class { };
            echo Foo::class;
            $e = enum_exists('X');
        "#;
        let stmts = parse_src(src).unwrap();
        assert!(types(&stmts).is_empty());
    }

    #[test]
    fn unbalanced_braces_fail() {
        assert!(parse_src("<?php class A {").is_err());
        assert!(parse_src("<?php } class A {}").is_err());
        assert!(parse_src("<?php namespace A { class B {}").is_err());
    }

    #[test]
    fn class_without_name_fails() {
        let err = parse_src("<?php\nclass {}").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn alternative_control_syntax_hides_declarations() {
        let src = r#"<?php
            if ($c): foo(); class X {} endif;
            foreach ($xs as $x):
                while ($x): interface Y {} endwhile;
            endforeach;
            switch ($v): case 1: trait Z {} break; endswitch;
            class Visible {}
        "#;
        let stmts = parse_src(src).unwrap();
        assert_eq!(types(&stmts), vec!["Visible"]);
    }

    #[test]
    fn readonly_call_is_not_a_declaration() {
        let stmts = parse_src("<?php readonly(); readonly final class R {}").unwrap();
        assert_eq!(types(&stmts), vec!["R"]);
        assert!(parse_src("<?php if ($c): class X {}").is_err());
    }

    #[test]
    fn halt_compiler_stops_parsing() {
        let stmts = parse_src("<?php class A {} __halt_compiler(); }}} class B {").unwrap();
        assert_eq!(types(&stmts), vec!["A"]);
    }
}
