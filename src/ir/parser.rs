//! Textual IR parser for tests and demo drivers.
//!
//! The format mirrors the printer in [`crate::ir`]:
//!
//! ```text
//! ; comments start with a semicolon
//! source "kernel.c"
//! extern @helper(i64) -> ptr
//! func @kernel(i64 %n, ptr %A) -> void {
//! entry:
//!   br ^header
//! header:
//!   %i = phi i64 [^entry, 0], [^latch, %inc]
//!   condbr %cmp, ^body, ^exit
//! }
//! ```
//!
//! Phi incoming values may reference results defined later in the function
//! (loop-carried values); everything else must be defined before use.

use super::{BlockRef, FuncRef, InstRef, Module, Type, ValueRef};
use hashbrown::HashMap;

/// Placeholder for a phi incoming value resolved after the body is parsed.
const UNRESOLVED: ValueRef = ValueRef(u32::MAX);

/// Parse a module from its textual form.
pub fn parse_module(text: &str) -> Result<Module, String> {
    Parser::new(text).parse()
}

struct Parser<'a> {
    lines: Vec<(usize, &'a str)>,
    pos: usize,
    source: String,
    module_name: String,
}

struct PhiFixup {
    inst: InstRef,
    slot: usize,
    name: String,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.split(';').next().unwrap_or("").trim()))
            .filter(|(_, l)| !l.is_empty())
            .collect();
        Self {
            lines,
            pos: 0,
            source: String::new(),
            module_name: "module".to_string(),
        }
    }

    fn parse(mut self) -> Result<Module, String> {
        // Header directives come before the first function.
        while let Some(&(line, text)) = self.lines.get(self.pos) {
            if let Some(rest) = text.strip_prefix("source") {
                self.source = rest.trim().trim_matches('"').to_string();
                self.pos += 1;
            } else if let Some(rest) = text.strip_prefix("module") {
                self.module_name = rest.trim().to_string();
                self.pos += 1;
            } else if text.starts_with("extern") || text.starts_with("func") {
                break;
            } else {
                return Err(format!("line {line}: unexpected directive '{text}'"));
            }
        }

        let mut module = Module::new(&self.module_name.clone(), self.source.clone());
        while let Some(&(line, text)) = self.lines.get(self.pos) {
            if text.starts_with("extern") {
                parse_extern(&mut module, line, text)?;
                self.pos += 1;
            } else if text.starts_with("func") {
                self.parse_func(&mut module)?;
            } else {
                return Err(format!("line {line}: expected function, found '{text}'"));
            }
        }
        Ok(module)
    }

    fn parse_func(&mut self, module: &mut Module) -> Result<(), String> {
        let (sig_line, text) = self.lines[self.pos];
        let rest = text.strip_prefix("func").unwrap().trim();
        let (name, rest) = parse_symbol(rest, sig_line)?;
        let name = name.to_string();
        let (params, rest) = split_parens(rest, sig_line)?;
        let rest = rest.trim();
        if !rest.ends_with('{') {
            return Err(format!("line {sig_line}: expected '{{' after function signature"));
        }
        let ret_ty = parse_ret_ty(rest.trim_end_matches('{').trim(), sig_line)?;
        self.pos += 1;

        let func = module.add_function(&name, ret_ty);
        let mut values: HashMap<String, ValueRef> = HashMap::new();
        for p in split_commas(params) {
            let (ty_text, arg_name) = p
                .split_once('%')
                .ok_or_else(|| format!("line {sig_line}: expected '%name' in parameter '{p}'"))?;
            let ty = parse_type(ty_text.trim(), sig_line)?;
            let val = module.func_mut(func).add_arg(arg_name.trim(), ty);
            values.insert(arg_name.trim().to_string(), val);
        }

        // First sweep the body for labels so branches can reference any block.
        let mut blocks: HashMap<String, BlockRef> = HashMap::new();
        let body_start = self.pos;
        while let Some(&(line, text)) = self.lines.get(self.pos) {
            if text == "}" {
                break;
            }
            if let Some(label) = text.strip_suffix(':') {
                if label.contains(' ') {
                    return Err(format!("line {line}: malformed label '{text}'"));
                }
                let block = module.func_mut(func).add_block(label);
                blocks.insert(label.to_string(), block);
            }
            self.pos += 1;
        }
        if self.lines.get(self.pos).is_none() {
            return Err(format!("line {sig_line}: missing '}}' for function @{name}"));
        }
        let body_end = self.pos;
        self.pos = body_end + 1;

        // Second sweep parses the instructions.
        let mut fixups: Vec<PhiFixup> = Vec::new();
        let mut current: Option<BlockRef> = None;
        for idx in body_start..body_end {
            let (line, text) = self.lines[idx];
            if let Some(label) = text.strip_suffix(':') {
                current = Some(blocks[label]);
                continue;
            }
            let block = current
                .ok_or_else(|| format!("line {line}: instruction before first block label"))?;
            parse_inst(
                module, func, block, &blocks, &mut values, &mut fixups, line, text,
            )?;
        }

        for fixup in fixups {
            let val = *values
                .get(&fixup.name)
                .ok_or_else(|| format!("line {}: unknown value '%{}'", fixup.line, fixup.name))?;
            module
                .func_mut(func)
                .phi_set_incoming_value(fixup.inst, fixup.slot, val);
        }
        Ok(())
    }
}

fn parse_extern(module: &mut Module, line: usize, text: &str) -> Result<(), String> {
    let rest = text.strip_prefix("extern").unwrap().trim();
    let (name, rest) = parse_symbol(rest, line)?;
    let (params, rest) = split_parens(rest, line)?;
    let mut param_types = Vec::new();
    for p in split_commas(params) {
        param_types.push(parse_type(p, line)?);
    }
    let ret_ty = parse_ret_ty(rest.trim(), line)?;
    module.declare_function(name, param_types, ret_ty);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn parse_inst(
    module: &mut Module,
    func: FuncRef,
    block: BlockRef,
    blocks: &HashMap<String, BlockRef>,
    values: &mut HashMap<String, ValueRef>,
    fixups: &mut Vec<PhiFixup>,
    line: usize,
    text: &str,
) -> Result<(), String> {
    let (result, body) = match text.split_once('=') {
        Some((lhs, rhs)) if lhs.trim_start().starts_with('%') => {
            let name = lhs
                .trim()
                .strip_prefix('%')
                .ok_or_else(|| format!("line {line}: malformed result '{lhs}'"))?;
            (Some(name.trim()), rhs.trim())
        }
        _ => (None, text),
    };

    let (opcode, rest) = match body.split_once(char::is_whitespace) {
        Some((op, rest)) => (op, rest.trim()),
        None => (body, ""),
    };

    match opcode {
        "phi" => {
            let name = result
                .ok_or_else(|| format!("line {line}: phi requires a result name"))?;
            let (ty_text, entries) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| format!("line {line}: phi requires a type"))?;
            let ty = parse_type(ty_text, line)?;
            let mut incoming = Vec::new();
            let mut pending = Vec::new();
            for (slot, entry) in split_brackets(entries.trim(), line)?.iter().enumerate() {
                let (block_text, val_text) = entry
                    .split_once(',')
                    .ok_or_else(|| format!("line {line}: malformed phi entry '[{entry}]'"))?;
                let from = lookup_block(blocks, block_text.trim(), line)?;
                match resolve_operand(module, func, values, ty, val_text.trim()) {
                    Some(val) => incoming.push((from, val)),
                    None => {
                        let val_name = val_text.trim().trim_start_matches('%').to_string();
                        incoming.push((from, UNRESOLVED));
                        pending.push((slot, val_name));
                    }
                }
            }
            let f = module.func_mut(func);
            let result_val = f.append_phi(block, name, ty, incoming);
            let phi_inst = f.def_inst(result_val).unwrap();
            values.insert(name.to_string(), result_val);
            for (slot, val_name) in pending {
                fixups.push(PhiFixup {
                    inst: phi_inst,
                    slot,
                    name: val_name,
                    line,
                });
            }
        }
        "call" => {
            let (ty, rest) = match result {
                Some(_) => {
                    let (ty_text, rest) = rest
                        .split_once(char::is_whitespace)
                        .ok_or_else(|| format!("line {line}: call with result requires a type"))?;
                    (Some(parse_type(ty_text, line)?), rest.trim())
                }
                None => (None, rest),
            };
            let (callee_name, rest) = parse_symbol(rest, line)?;
            let callee = module
                .func_by_name(callee_name)
                .ok_or_else(|| format!("line {line}: unknown function '@{callee_name}'"))?;
            let (arg_text, _) = split_parens(rest, line)?;
            let mut args = Vec::new();
            for a in split_commas(arg_text) {
                args.push(expect_operand(module, func, values, Type::Int(64), a, line)?);
            }
            match result {
                Some(name) => {
                    let val = module.func_mut(func).append_call(
                        block,
                        name,
                        ty.unwrap_or(Type::Ptr),
                        callee,
                        args,
                    );
                    values.insert(name.to_string(), val);
                }
                None => module.func_mut(func).append_call_void(block, callee, args),
            }
        }
        "br" => {
            let target = lookup_block(blocks, rest, line)?;
            module.func_mut(func).append_br(block, target);
        }
        "condbr" => {
            let parts: Vec<&str> = split_commas(rest);
            if parts.len() != 3 {
                return Err(format!("line {line}: condbr expects 'cond, ^then, ^else'"));
            }
            let cond = expect_operand(module, func, values, Type::Int(1), parts[0], line)?;
            let then_target = lookup_block(blocks, parts[1], line)?;
            let else_target = lookup_block(blocks, parts[2], line)?;
            module
                .func_mut(func)
                .append_condbr(block, cond, then_target, else_target);
        }
        "ret" => {
            let value = if rest.is_empty() {
                None
            } else {
                Some(expect_operand(module, func, values, Type::Int(64), rest, line)?)
            };
            module.func_mut(func).append_ret(block, value);
        }
        _ => {
            // Generic op, with an optional leading type when a result is bound.
            let (ty, operand_text) = match rest.split_once(char::is_whitespace) {
                Some((first, more)) if parse_type(first, line).is_ok() => {
                    (parse_type(first, line)?, more.trim())
                }
                _ => (Type::Int(64), rest),
            };
            let mut operands = Vec::new();
            for o in split_commas(operand_text) {
                operands.push(expect_operand(module, func, values, ty, o, line)?);
            }
            let result = result.map(|name| (name, ty));
            let val = module.func_mut(func).append_op(block, result, opcode, operands);
            if let (Some(val), Some((name, _))) = (val, result) {
                values.insert(name.to_string(), val);
            }
        }
    }
    Ok(())
}

fn resolve_operand(
    module: &mut Module,
    func: FuncRef,
    values: &HashMap<String, ValueRef>,
    const_ty: Type,
    text: &str,
) -> Option<ValueRef> {
    match text.strip_prefix('%') {
        Some(name) => values.get(name).copied(),
        None => Some(module.func_mut(func).add_const(text, const_ty)),
    }
}

fn expect_operand(
    module: &mut Module,
    func: FuncRef,
    values: &HashMap<String, ValueRef>,
    const_ty: Type,
    text: &str,
    line: usize,
) -> Result<ValueRef, String> {
    resolve_operand(module, func, values, const_ty, text)
        .ok_or_else(|| format!("line {line}: unknown value '{text}'"))
}

fn lookup_block(
    blocks: &HashMap<String, BlockRef>,
    text: &str,
    line: usize,
) -> Result<BlockRef, String> {
    let name = text
        .strip_prefix('^')
        .ok_or_else(|| format!("line {line}: expected '^block', found '{text}'"))?;
    blocks
        .get(name)
        .copied()
        .ok_or_else(|| format!("line {line}: unknown block '^{name}'"))
}

fn parse_symbol(text: &str, line: usize) -> Result<(&str, &str), String> {
    let rest = text
        .strip_prefix('@')
        .ok_or_else(|| format!("line {line}: expected '@name', found '{text}'"))?;
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(rest.len());
    if end == 0 {
        return Err(format!("line {line}: empty symbol name"));
    }
    Ok((&rest[..end], &rest[end..]))
}

fn split_parens(text: &str, line: usize) -> Result<(&str, &str), String> {
    let rest = text
        .trim_start()
        .strip_prefix('(')
        .ok_or_else(|| format!("line {line}: expected '(', found '{text}'"))?;
    let close = rest
        .find(')')
        .ok_or_else(|| format!("line {line}: missing ')'"))?;
    Ok((&rest[..close], &rest[close + 1..]))
}

fn split_commas(text: &str) -> Vec<&str> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_brackets(text: &str, line: usize) -> Result<Vec<&str>, String> {
    let mut entries = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        rest = rest
            .strip_prefix('[')
            .ok_or_else(|| format!("line {line}: expected '[', found '{rest}'"))?;
        let close = rest
            .find(']')
            .ok_or_else(|| format!("line {line}: missing ']'"))?;
        entries.push(&rest[..close]);
        rest = rest[close + 1..].trim_start().trim_start_matches(',').trim_start();
    }
    Ok(entries)
}

fn parse_ret_ty(text: &str, line: usize) -> Result<Type, String> {
    match text.strip_prefix("->") {
        Some(ty) => parse_type(ty.trim(), line),
        None if text.is_empty() => Ok(Type::Void),
        None => Err(format!("line {line}: expected '-> type', found '{text}'")),
    }
}

fn parse_type(text: &str, line: usize) -> Result<Type, String> {
    match text {
        "void" => Ok(Type::Void),
        "float" => Ok(Type::Float),
        "double" => Ok(Type::Double),
        "ptr" => Ok(Type::Ptr),
        _ => match text.strip_prefix('i').and_then(|b| b.parse::<u32>().ok()) {
            Some(bits) => Ok(Type::Int(bits)),
            None => Err(format!("line {line}: unknown type '{text}'")),
        },
    }
}
