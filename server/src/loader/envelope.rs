//! Delivery envelopes.
//!
//! The default wrapper base64-encodes the payload three times, adds two inert
//! decoy tokens and embeds everything in a client stub that reverses the
//! layers and runs the result. None of this is cryptographic; it only raises
//! the effort needed to read a captured response. Swap the [`PayloadWrapper`]
//! to change the envelope without touching the gate.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use rand::Rng;

use crate::compiler::lexer::ALL_KINDS;
use crate::compiler::TokenKind;
use crate::db::models::RouteKind;
use crate::vm::DEFAULT_MAX_STACK;

/// Number of base64 layers applied by [`LayeredBase64`].
pub const ENCODING_ROUNDS: usize = 3;

/// Strategy turning a stored program into the response body.
pub trait PayloadWrapper: Send + Sync {
    fn wrap(&self, payload: &str, kind: RouteKind) -> String;
}

/// Apply `rounds` layers of standard base64.
pub fn encode_layers(payload: &str, rounds: usize) -> String {
    let mut out = payload.to_string();
    for _ in 0..rounds {
        out = STANDARD.encode(out.as_bytes());
    }
    out
}

/// Peel `rounds` layers of standard base64.
pub fn decode_layers(encoded: &str, rounds: usize) -> Result<String, String> {
    let mut out = encoded.to_string();
    for round in 0..rounds {
        let bytes = STANDARD
            .decode(out.as_bytes())
            .map_err(|e| format!("Layer {} is not base64: {}", round + 1, e))?;
        out = String::from_utf8(bytes)
            .map_err(|_| format!("Layer {} is not UTF-8", round + 1))?;
    }
    Ok(out)
}

/// Random inert token, 8 bytes of entropy, URL-safe base64.
pub fn decoy_token() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Kinds with an effect in the VM. Every other wire kind is a no-op.
const EXECUTED_KINDS: [TokenKind; 7] = [
    TokenKind::Identifier,
    TokenKind::Number,
    TokenKind::StringDouble,
    TokenKind::StringSingle,
    TokenKind::Arithmetic,
    TokenKind::Comparison,
    TokenKind::Assign,
];

/// Lua table body listing the wire names the client VM skips, including
/// the legacy `WHITESPACE` kind.
fn noop_kind_table() -> String {
    ALL_KINDS
        .iter()
        .filter(|kind| !EXECUTED_KINDS.contains(kind))
        .map(|kind| kind.as_str())
        .chain(std::iter::once("WHITESPACE"))
        .map(|name| format!("{} = true", name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Default envelope: layered base64, two decoys, Lua client stub.
///
/// `max_stack` is baked into the VM stub so the client faults where the
/// server-side dry run does.
#[derive(Debug, Clone, Copy)]
pub struct LayeredBase64 {
    max_stack: usize,
}

impl LayeredBase64 {
    pub fn new(max_stack: usize) -> Self {
        Self { max_stack }
    }

    fn vm_runner(&self) -> String {
        VM_RUNNER
            .replace("{{max_stack}}", &self.max_stack.to_string())
            .replace("{{noop_kinds}}", &noop_kind_table())
    }
}

impl Default for LayeredBase64 {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STACK)
    }
}

impl PayloadWrapper for LayeredBase64 {
    fn wrap(&self, payload: &str, kind: RouteKind) -> String {
        let layered = encode_layers(payload, ENCODING_ROUNDS);
        let decoy_a = decoy_token();
        let decoy_b = decoy_token();
        let runner = match kind {
            RouteKind::Script => SCRIPT_RUNNER.to_string(),
            RouteKind::Vm => self.vm_runner(),
        };
        format!(
            "{guard}\nlocal illusionsA = \"{decoy_a}\"\nlocal illusionsB = \"{decoy_b}\"\n\n{decoder}\nlocal step3 = \"{layered}\"\nlocal payload = b64decode(b64decode(b64decode(step3)))\n\n{runner}",
            guard = CLIENT_GUARD,
            decoder = LUA_BASE64_DECODER,
        )
    }
}

/// Client-side re-check for hooking functions before anything is decoded.
const CLIENT_GUARD: &str = r#"if hookfunction or (debug and debug.setupvalue) or hookmetamethod then
    return print("Suspicious environment, aborting.")
end"#;

const LUA_BASE64_DECODER: &str = r#"local B64 = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/"
local function b64decode(data)
    data = string.gsub(data, "[^" .. B64 .. "=]", "")
    return (data:gsub(".", function(x)
        if x == "=" then return "" end
        local bits, f = "", (B64:find(x, 1, true) - 1)
        for i = 6, 1, -1 do
            bits = bits .. (f % 2 ^ i - f % 2 ^ (i - 1) > 0 and "1" or "0")
        end
        return bits
    end):gsub("%d%d%d?%d?%d?%d?%d?%d?", function(x)
        if #x ~= 8 then return "" end
        local c = 0
        for i = 1, 8 do
            c = c + (x:sub(i, i) == "1" and 2 ^ (8 - i) or 0)
        end
        return string.char(c)
    end))
end
"#;

const SCRIPT_RUNNER: &str = r#"loadstring(payload)()
"#;

/// Lua port of `vm::Vm`: same per-kind effects, same faults. The whole
/// program is decoded before the first instruction runs, so a bad record
/// fails without side effects.
const VM_RUNNER: &str = r#"local EXECUTED = { IDENT = true, NUMBER = true, STRING_DQ = true, STRING_SQ = true, ARITH = true, COMP = true, ASSIGN = true }
local NOOP = { {{noop_kinds}} }
local function vm_run(bytecode)
    local program = {}
    for record in string.gmatch(bytecode, "[^|]+") do
        local kind, enc = record:match("^([^:]*):(.*)$")
        if kind == nil then error("malformed instruction " .. (#program + 1)) end
        if not EXECUTED[kind] and not NOOP[kind] then
            error("unknown instruction kind " .. kind)
        end
        program[#program + 1] = { kind, b64decode(enc) }
    end
    local stack, env = {}, {}
    local function push(v)
        if #stack >= {{max_stack}} then error("stack overflow") end
        stack[#stack + 1] = v
    end
    local function pop()
        if #stack == 0 then error("stack underflow") end
        local v = stack[#stack]
        stack[#stack] = nil
        return v
    end
    local function num(v, op)
        local n = tonumber(v)
        if n == nil then error("cannot apply " .. op .. " to " .. type(v)) end
        return n
    end
    for _, instruction in ipairs(program) do
        local kind, text = instruction[1], instruction[2]
        if kind == "IDENT" then
            push(text)
        elseif kind == "NUMBER" then
            local n = tonumber(text)
            if n == nil then error("invalid number " .. text) end
            push(n)
        elseif kind == "STRING_DQ" or kind == "STRING_SQ" then
            local first, last = text:sub(1, 1), text:sub(-1)
            if #text >= 2 and first == last and (first == '"' or first == "'") then
                text = text:sub(2, -2)
            end
            push(text)
        elseif kind == "ARITH" then
            local b, a = pop(), pop()
            local x, y = num(a, text), num(b, text)
            if (text == "/" or text == "%") and y == 0 then error("division by zero") end
            if text == "+" then push(x + y)
            elseif text == "-" then push(x - y)
            elseif text == "*" then push(x * y)
            elseif text == "/" then push(x / y)
            elseif text == "%" then push(x % y)
            else error("unsupported operator " .. text) end
        elseif kind == "COMP" then
            local b, a = pop(), pop()
            if text == "==" then push(a == b)
            elseif text == "~=" then push(a ~= b)
            elseif text == "<" then push(a < b)
            elseif text == ">" then push(a > b)
            elseif text == "<=" then push(a <= b)
            elseif text == ">=" then push(a >= b)
            else error("unsupported operator " .. text) end
        elseif kind == "ASSIGN" then
            local value = pop()
            local name = pop()
            env[tostring(name)] = value
        end
    end
    return stack, env
end

vm_run(payload)
"#;
