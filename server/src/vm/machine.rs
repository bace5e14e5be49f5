use std::collections::BTreeMap;

use crate::compiler::{decode_program, DecodeError, Instruction, TokenKind};
use crate::vm::value::Value;

/// Stack depth at which execution is aborted.
pub const DEFAULT_MAX_STACK: usize = 4096;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VmError {
    #[error("stack underflow at instruction {pc}")]
    StackUnderflow { pc: usize },
    #[error("stack overflow at instruction {pc} (limit {limit})")]
    StackOverflow { pc: usize, limit: usize },
    #[error("invalid number {text:?} at instruction {pc}")]
    InvalidNumber { pc: usize, text: String },
    #[error("cannot apply {op:?} to {left} and {right} at instruction {pc}")]
    TypeMismatch {
        pc: usize,
        op: String,
        left: &'static str,
        right: &'static str,
    },
    #[error("division by zero at instruction {pc}")]
    DivisionByZero { pc: usize },
    #[error("unsupported operator {op:?} at instruction {pc}")]
    UnsupportedOperator { pc: usize, op: String },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Stack machine over decoded instructions.
///
/// There are no jumps: the program counter advances by one per instruction.
/// Keywords (`if`, `while`, `for`, ...) decode but execute as no-ops, and the
/// punctuation kinds for calls, tables and indexing are skipped the same way.
/// Control flow, calls and table access are not implemented.
#[derive(Debug)]
pub struct Vm {
    stack: Vec<Value>,
    env: BTreeMap<String, Value>,
    pc: usize,
    max_stack: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_max_stack(DEFAULT_MAX_STACK)
    }

    pub fn with_max_stack(max_stack: usize) -> Self {
        Self {
            stack: Vec::new(),
            env: BTreeMap::new(),
            pc: 0,
            max_stack,
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn top(&self) -> Option<&Value> {
        self.stack.last()
    }

    pub fn env(&self) -> &BTreeMap<String, Value> {
        &self.env
    }

    /// Number of instructions executed so far.
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Run every instruction in order. Stops at the first fault.
    pub fn run(&mut self, program: &[Instruction]) -> Result<(), VmError> {
        for instruction in program {
            self.step(instruction)?;
            self.pc += 1;
        }
        Ok(())
    }

    /// Decode a flattened instruction string and run it on a fresh machine.
    pub fn run_bytecode(bytecode: &str, max_stack: usize) -> Result<Vm, VmError> {
        let program = decode_program(bytecode)?;
        let mut vm = Vm::with_max_stack(max_stack);
        vm.run(&program)?;
        Ok(vm)
    }

    fn step(&mut self, instruction: &Instruction) -> Result<(), VmError> {
        let text = instruction.text.as_str();
        match instruction.kind {
            TokenKind::Identifier => self.push(Value::Str(text.to_string())),
            TokenKind::Number => {
                let n = text.parse::<f64>().map_err(|_| VmError::InvalidNumber {
                    pc: self.pc,
                    text: text.to_string(),
                })?;
                self.push(Value::Num(n))
            }
            TokenKind::StringDouble | TokenKind::StringSingle => {
                self.push(Value::Str(strip_quotes(text).to_string()))
            }
            TokenKind::Arithmetic => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = self.arithmetic(text, &a, &b)?;
                self.push(result)
            }
            TokenKind::Comparison => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = self.compare(text, &a, &b)?;
                self.push(Value::Bool(result))
            }
            TokenKind::Assign => {
                let value = self.pop()?;
                let name = self.pop()?;
                self.env.insert(name.to_string(), value);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.stack.len() >= self.max_stack {
            return Err(VmError::StackOverflow {
                pc: self.pc,
                limit: self.max_stack,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or(VmError::StackUnderflow { pc: self.pc })
    }

    fn arithmetic(&self, op: &str, a: &Value, b: &Value) -> Result<Value, VmError> {
        let (x, y) = match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(VmError::TypeMismatch {
                    pc: self.pc,
                    op: op.to_string(),
                    left: a.type_name(),
                    right: b.type_name(),
                })
            }
        };
        let result = match op {
            "+" => x + y,
            "-" => x - y,
            "*" => x * y,
            "/" | "%" if y == 0.0 => return Err(VmError::DivisionByZero { pc: self.pc }),
            "/" => x / y,
            // Floored modulo: the result takes the sign of the divisor.
            "%" => x - (x / y).floor() * y,
            _ => {
                return Err(VmError::UnsupportedOperator {
                    pc: self.pc,
                    op: op.to_string(),
                })
            }
        };
        Ok(Value::Num(result))
    }

    fn compare(&self, op: &str, a: &Value, b: &Value) -> Result<bool, VmError> {
        match op {
            "==" => return Ok(a.raw_eq(b)),
            "~=" => return Ok(!a.raw_eq(b)),
            _ => {}
        }
        let ordering = a.order(b).ok_or_else(|| VmError::TypeMismatch {
            pc: self.pc,
            op: op.to_string(),
            left: a.type_name(),
            right: b.type_name(),
        })?;
        match op {
            "<" => Ok(ordering.is_lt()),
            ">" => Ok(ordering.is_gt()),
            "<=" => Ok(ordering.is_le()),
            ">=" => Ok(ordering.is_ge()),
            _ => Err(VmError::UnsupportedOperator {
                pc: self.pc,
                op: op.to_string(),
            }),
        }
    }
}

/// Strip one matching pair of surrounding quotes, if present.
fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn run(source: &str) -> Result<Vm, VmError> {
        Vm::run_bytecode(&compile(source).bytecode, DEFAULT_MAX_STACK)
    }

    #[test]
    fn test_postfix_addition() {
        let vm = run("1 2 +").unwrap();
        assert_eq!(vm.top(), Some(&Value::Num(3.0)));
        assert_eq!(vm.stack().len(), 1);
        assert_eq!(vm.pc(), 3);
    }

    #[test]
    fn test_operand_order() {
        assert_eq!(run("10 4 -").unwrap().top(), Some(&Value::Num(6.0)));
        assert_eq!(run("10 4 /").unwrap().top(), Some(&Value::Num(2.5)));
        assert_eq!(run("7 3 %").unwrap().top(), Some(&Value::Num(1.0)));
        assert_eq!(run("1 2 <").unwrap().top(), Some(&Value::Bool(true)));
        assert_eq!(run("1 2 >=").unwrap().top(), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_floored_modulo() {
        let program = vec![
            Instruction::new(TokenKind::Number, "7"),
            Instruction::new(TokenKind::Identifier, "-3"),
            Instruction::new(TokenKind::Arithmetic, "%"),
        ];
        let mut vm = Vm::new();
        vm.run(&program).unwrap();
        assert_eq!(vm.top(), Some(&Value::Num(-2.0)));
    }

    #[test]
    fn test_equality_and_strings() {
        let vm = run(r#""abc" 'abc' =="#).unwrap();
        assert_eq!(vm.top(), Some(&Value::Bool(true)));
        let vm = run(r#""1" 1 ~="#).unwrap();
        assert_eq!(vm.top(), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_assignment_binds_environment() {
        let vm = run("x 4 2 * =").unwrap();
        assert_eq!(vm.env().get("x"), Some(&Value::Num(8.0)));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn test_infix_assignment_underflows() {
        // Tokens execute in source order, so `x = ...` pops before anything
        // but the name is on the stack.
        assert_eq!(run("x = 1 + 2").unwrap_err(), VmError::StackUnderflow { pc: 1 });
    }

    #[test]
    fn test_keywords_and_punctuation_are_no_ops() {
        let vm = run("if 1 then ( 2 ) , end ;").unwrap();
        assert_eq!(vm.stack(), &[Value::Num(1.0), Value::Num(2.0)]);
    }

    #[test]
    fn test_stack_underflow() {
        assert_eq!(run("+").unwrap_err(), VmError::StackUnderflow { pc: 0 });
        assert_eq!(run("1 ==").unwrap_err(), VmError::StackUnderflow { pc: 1 });
    }

    #[test]
    fn test_division_by_zero_faults() {
        assert_eq!(run("1 0 /").unwrap_err(), VmError::DivisionByZero { pc: 2 });
        assert_eq!(run("1 0 %").unwrap_err(), VmError::DivisionByZero { pc: 2 });
    }

    #[test]
    fn test_type_mismatch() {
        let err = run("name 1 +").unwrap_err();
        assert!(matches!(err, VmError::TypeMismatch { pc: 2, .. }));
        let err = run("1 'a' <").unwrap_err();
        assert!(matches!(err, VmError::TypeMismatch { pc: 2, .. }));
    }

    #[test]
    fn test_power_operator_is_unsupported() {
        assert_eq!(
            run("2 3 ^").unwrap_err(),
            VmError::UnsupportedOperator {
                pc: 2,
                op: "^".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_number_is_fatal() {
        let program = vec![Instruction::new(TokenKind::Number, "1.2.3")];
        let err = Vm::new().run(&program).unwrap_err();
        assert_eq!(
            err,
            VmError::InvalidNumber {
                pc: 0,
                text: "1.2.3".to_string()
            }
        );
    }

    #[test]
    fn test_stack_cap() {
        let err = Vm::run_bytecode(&compile("1 2 3").bytecode, 2).unwrap_err();
        assert_eq!(err, VmError::StackOverflow { pc: 2, limit: 2 });
    }

    #[test]
    fn test_decode_failure_surfaces() {
        assert!(matches!(
            Vm::run_bytecode("NUMBER", DEFAULT_MAX_STACK),
            Err(VmError::Decode(_))
        ));
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"hi\""), "hi");
        assert_eq!(strip_quotes("'hi'"), "hi");
        assert_eq!(strip_quotes("\"hi'"), "\"hi'");
        assert_eq!(strip_quotes("\""), "\"");
    }
}
