//! Instruction encoding.
//!
//! Each token becomes one record `KIND:base64(text)`; records are joined with
//! `|`. Neither `|` nor `:` is in the base64 alphabet, so records split back
//! unambiguously. The encoding hides nothing: every token is recoverable.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::compiler::lexer::{Token, TokenKind};

/// Separator between instruction records.
pub const RECORD_DELIMITER: char = '|';

/// Separator between the kind and the payload inside one record.
pub const FIELD_DELIMITER: char = ':';

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("instruction {index}: missing ':' separator")]
    Malformed { index: usize },
    #[error("instruction {index}: unknown kind {kind:?}")]
    UnknownKind { index: usize, kind: String },
    #[error("instruction {index}: invalid base64 payload")]
    Base64 { index: usize },
    #[error("instruction {index}: payload is not valid UTF-8")]
    Utf8 { index: usize },
}

/// One decoded instruction: the token kind and its original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: TokenKind,
    pub text: String,
}

impl Instruction {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// Encode as a single `KIND:payload` record.
    pub fn encode(&self) -> String {
        encode_record(self.kind, &self.text)
    }

    /// Decode a single record. `index` is only used for error reporting.
    pub fn decode(record: &str, index: usize) -> Result<Self, DecodeError> {
        let (kind, payload) = record
            .split_once(FIELD_DELIMITER)
            .ok_or(DecodeError::Malformed { index })?;
        let kind = TokenKind::from_wire(kind).ok_or_else(|| DecodeError::UnknownKind {
            index,
            kind: kind.to_string(),
        })?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|_| DecodeError::Base64 { index })?;
        let text = String::from_utf8(bytes).map_err(|_| DecodeError::Utf8 { index })?;
        Ok(Self { kind, text })
    }
}

impl From<Token<'_>> for Instruction {
    fn from(token: Token<'_>) -> Self {
        Self::new(token.kind, token.text)
    }
}

fn encode_record(kind: TokenKind, text: &str) -> String {
    format!("{}{}{}", kind.as_str(), FIELD_DELIMITER, STANDARD.encode(text))
}

/// Encode a token stream into the flattened instruction string.
pub fn encode_tokens<'src>(tokens: impl IntoIterator<Item = Token<'src>>) -> (String, usize) {
    let mut out = String::new();
    let mut count = 0;
    for token in tokens {
        if count > 0 {
            out.push(RECORD_DELIMITER);
        }
        out.push_str(&encode_record(token.kind, token.text));
        count += 1;
    }
    (out, count)
}

/// Decode a flattened instruction string. Empty records are skipped, so the
/// empty string decodes to an empty program.
pub fn decode_program(bytecode: &str) -> Result<Vec<Instruction>, DecodeError> {
    bytecode
        .split(RECORD_DELIMITER)
        .filter(|record| !record.is_empty())
        .enumerate()
        .map(|(index, record)| Instruction::decode(record, index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::tokenize;
    use proptest::prelude::*;

    #[test]
    fn test_record_format() {
        let (bytecode, count) = encode_tokens(tokenize("x = 1"));
        assert_eq!(count, 3);
        assert_eq!(bytecode, "IDENT:eA==|ASSIGN:PQ==|NUMBER:MQ==");
    }

    #[test]
    fn test_every_kind_decodes_to_original_text() {
        let source = r#"local f = function(...) return a .. "s" , 'q' end; t[1] = {x:y()} ~= 2.5 % 3 $"#;
        let tokens: Vec<_> = tokenize(source).collect();
        let (bytecode, _) = encode_tokens(tokens.iter().copied());
        let decoded = decode_program(&bytecode).unwrap();

        assert_eq!(decoded.len(), tokens.len());
        for (token, instruction) in tokens.iter().zip(&decoded) {
            assert_eq!(instruction.kind, token.kind);
            assert_eq!(instruction.text, token.text);
        }
        assert!(decoded.iter().any(|i| i.kind == TokenKind::Unknown));
    }

    #[test]
    fn test_payloads_never_contain_delimiters() {
        let (bytecode, count) = encode_tokens(tokenize("a|b : 'x|y:z'"));
        assert_eq!(bytecode.split(RECORD_DELIMITER).count(), count);
        for record in bytecode.split(RECORD_DELIMITER) {
            assert_eq!(record.matches(FIELD_DELIMITER).count(), 1);
        }
    }

    #[test]
    fn test_empty_program() {
        let (bytecode, count) = encode_tokens(tokenize("   \n"));
        assert_eq!(bytecode, "");
        assert_eq!(count, 0);
        assert!(decode_program("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode_program("NUMBER:MQ==|garbage"),
            Err(DecodeError::Malformed { index: 1 })
        );
        assert_eq!(
            decode_program("JUMP:MQ=="),
            Err(DecodeError::UnknownKind {
                index: 0,
                kind: "JUMP".to_string()
            })
        );
        assert_eq!(
            decode_program("NUMBER:***"),
            Err(DecodeError::Base64 { index: 0 })
        );
        assert_eq!(
            decode_program("IDENT:/w=="),
            Err(DecodeError::Utf8 { index: 0 })
        );
    }

    #[test]
    fn test_legacy_whitespace_records_are_tolerated() {
        let decoded = decode_program("WHITESPACE:IA==|NUMBER:Mg==").unwrap();
        assert_eq!(decoded[0], Instruction::new(TokenKind::Unknown, " "));
        assert_eq!(decoded[1], Instruction::new(TokenKind::Number, "2"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Every token of any source decodes back to its kind and text.
        #[test]
        fn prop_encoding_round_trips(source in any::<String>()) {
            let tokens: Vec<_> = tokenize(&source).collect();
            let (bytecode, count) = encode_tokens(tokens.iter().copied());
            let decoded = decode_program(&bytecode).unwrap();

            prop_assert_eq!(count, tokens.len());
            prop_assert_eq!(decoded.len(), tokens.len());
            for (token, instruction) in tokens.iter().zip(&decoded) {
                prop_assert_eq!(instruction.kind, token.kind);
                prop_assert_eq!(instruction.text.as_str(), token.text);
            }
        }
    }
}
