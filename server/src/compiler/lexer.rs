//! Tokenizer for loader source text.
//!
//! Built on logos. Patterns are resolved longest-match first, with keyword
//! literals taking priority over the identifier pattern, so `==` never lexes
//! as two `=` and `...` never lexes as `..` followed by `.`.
//!
//! Tokenization cannot fail. Any character no pattern accepts is emitted as a
//! single-character [`TokenKind::Unknown`] token and lexing resumes at the next
//! character. Whitespace (Unicode `White_Space` plus the ASCII separators
//! U+001C..U+001F, see [`is_source_whitespace`]) is skipped and never emitted.

use logos::{Lexer, Logos};
use std::fmt;

/// Lexical category of a token.
///
/// The wire name (see [`TokenKind::as_str`]) is what appears in front of each
/// encoded instruction record, so it must stay stable.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(skip r"[\s\x1C-\x1F]+")]
pub enum TokenKind {
    #[token("if")]
    #[token("then")]
    #[token("else")]
    #[token("elseif")]
    #[token("end")]
    #[token("while")]
    #[token("do")]
    #[token("for")]
    #[token("in")]
    #[token("repeat")]
    #[token("until")]
    #[token("function")]
    #[token("local")]
    #[token("return")]
    #[token("break")]
    #[token("true")]
    #[token("false")]
    #[token("nil")]
    #[token("not")]
    #[token("and")]
    #[token("or")]
    Keyword,

    /// ASCII letter or `_`, then any Unicode word characters (`café`).
    #[regex(r"[A-Za-z_]\w*")]
    Identifier,

    #[token("==")]
    #[token("~=")]
    #[token("<=")]
    #[token(">=")]
    #[token("<")]
    #[token(">")]
    Comparison,

    #[token("+")]
    #[token("-")]
    #[token("*")]
    #[token("/")]
    #[token("%")]
    #[token("^")]
    Arithmetic,

    #[token("...")]
    Ellipsis,

    #[token("..")]
    Concat,

    #[token("=")]
    Assign,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(";")]
    Semicolon,

    #[token(":")]
    Colon,

    #[token(".")]
    Dot,

    #[token(",")]
    Comma,

    #[regex(r#""([^"\\]|\\.)*""#)]
    StringDouble,

    #[regex(r"'([^'\\]|\\.)*'")]
    StringSingle,

    #[regex("[0-9]+", number_fraction)]
    Number,

    /// Never produced by the logos automaton; substituted for lex errors.
    Unknown,
}

/// Extend an integer match with an optional `.digits` fraction.
///
/// Done by hand so `1..2` still lexes as `1`, `..`, `2` without the automaton
/// having to backtrack out of a half-matched fraction.
fn number_fraction(lex: &mut Lexer<TokenKind>) -> bool {
    let rest = lex.remainder().as_bytes();
    if rest.len() >= 2 && rest[0] == b'.' && rest[1].is_ascii_digit() {
        let digits = rest[1..].iter().take_while(|b| b.is_ascii_digit()).count();
        lex.bump(1 + digits);
    }
    true
}

/// Every kind, in wire-table order.
pub const ALL_KINDS: [TokenKind; 21] = [
    TokenKind::Keyword,
    TokenKind::Identifier,
    TokenKind::Comparison,
    TokenKind::Arithmetic,
    TokenKind::Ellipsis,
    TokenKind::Concat,
    TokenKind::Assign,
    TokenKind::LParen,
    TokenKind::RParen,
    TokenKind::LBrace,
    TokenKind::RBrace,
    TokenKind::LBracket,
    TokenKind::RBracket,
    TokenKind::Semicolon,
    TokenKind::Colon,
    TokenKind::Dot,
    TokenKind::Comma,
    TokenKind::StringDouble,
    TokenKind::StringSingle,
    TokenKind::Number,
    TokenKind::Unknown,
];

impl TokenKind {
    /// Wire name used in encoded instruction records.
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Keyword => "KEYWORD",
            TokenKind::Identifier => "IDENT",
            TokenKind::Comparison => "COMP",
            TokenKind::Arithmetic => "ARITH",
            TokenKind::Ellipsis => "VARARG",
            TokenKind::Concat => "CONCAT",
            TokenKind::Assign => "ASSIGN",
            TokenKind::LParen => "LPAREN",
            TokenKind::RParen => "RPAREN",
            TokenKind::LBrace => "LBRACE",
            TokenKind::RBrace => "RBRACE",
            TokenKind::LBracket => "LBRACKET",
            TokenKind::RBracket => "RBRACKET",
            TokenKind::Semicolon => "SEMICOLON",
            TokenKind::Colon => "COLON",
            TokenKind::Dot => "DOT",
            TokenKind::Comma => "COMMA",
            TokenKind::StringDouble => "STRING_DQ",
            TokenKind::StringSingle => "STRING_SQ",
            TokenKind::Number => "NUMBER",
            TokenKind::Unknown => "UNKNOWN",
        }
    }

    /// Inverse of [`TokenKind::as_str`].
    ///
    /// Older instruction strings may carry `WHITESPACE` records; they are read
    /// back as `Unknown`, which every consumer treats as a no-op.
    pub fn from_wire(name: &str) -> Option<TokenKind> {
        if name == "WHITESPACE" {
            return Some(TokenKind::Unknown);
        }
        ALL_KINDS.iter().copied().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Characters the tokenizer skips between tokens.
pub fn is_source_whitespace(c: char) -> bool {
    c.is_whitespace() || ('\u{1C}'..='\u{1F}').contains(&c)
}

/// A lexed token borrowing its text from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
}

/// Lazy token stream over a source string.
///
/// Cloning the stream restarts nothing; call [`tokenize`] again to start
/// over from the beginning.
#[derive(Clone)]
pub struct Tokens<'src> {
    source: &'src str,
    /// Byte offset of `inner`'s input within `source`.
    base: usize,
    inner: Lexer<'src, TokenKind>,
}

/// Tokenize `source`. Never fails; see the module docs.
pub fn tokenize(source: &str) -> Tokens<'_> {
    Tokens {
        source,
        base: 0,
        inner: TokenKind::lexer(source),
    }
}

impl<'src> Iterator for Tokens<'src> {
    type Item = Token<'src>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.inner.next()?;
        let span = self.inner.span();
        let start = self.base + span.start;
        let end = self.base + span.end;

        match result {
            Ok(kind) => Some(Token {
                kind,
                text: &self.source[start..end],
            }),
            Err(()) => {
                // A failed partial match (e.g. an unterminated string) can span
                // several characters, and a byte-level error can stop inside a
                // multi-byte character. Only the first character is unknown;
                // lexing restarts right after it.
                let ch = self.source[start..].chars().next()?;
                let next = start + ch.len_utf8();
                if next != end {
                    self.base = next;
                    self.inner = TokenKind::lexer(&self.source[next..]);
                }
                Some(Token {
                    kind: TokenKind::Unknown,
                    text: &self.source[start..next],
                })
            }
        }
    }
}
