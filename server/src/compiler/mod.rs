//! Source-to-instruction compiler for the VM loader variant.
//!
//! `compile` tokenizes the source and encodes every token as one instruction
//! record. The output is deterministic: no timestamps or randomness enter the
//! instruction string, so compiling the same source twice is byte-identical.

pub mod encoder;
pub mod lexer;

use sha2::{Digest, Sha256};

pub use encoder::{decode_program, DecodeError, Instruction};
pub use lexer::{tokenize, Token, TokenKind, Tokens};

/// Result of compiling one source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    /// Flattened `KIND:payload|KIND:payload...` string.
    pub bytecode: String,
    pub instruction_count: usize,
    /// Hex SHA-256 of the source text.
    pub source_hash: String,
}

pub fn compile(source: &str) -> CompiledProgram {
    let (bytecode, instruction_count) = encoder::encode_tokens(tokenize(source));
    CompiledProgram {
        bytecode,
        instruction_count,
        source_hash: hex::encode(Sha256::digest(source.as_bytes())),
    }
}
