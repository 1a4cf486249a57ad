// This module defines the host intermediate representation that the splice pipeline
// operates on. A Module owns functions identified by its source file path; each Function
// owns its basic blocks, values (arguments, constants and instruction results) and
// instructions in stable index vectors addressed by copyable newtype refs (FuncRef,
// BlockRef, ValueRef, InstRef). Instructions cover phi nodes with incoming value/block
// pairs, calls, branches, returns and a generic textual-opcode form for ordinary
// computation. The mutation surface is exactly what the control-flow splicer needs:
// declaring external functions, appending blocks and instructions, redirecting a
// terminator's successor edges and extending phi incoming lists. The module printer
// renders a deterministic textual dump used for exported instruction payloads,
// parameter variable texts, and byte-identical before/after snapshots in tests.

//! Host IR: module, functions, blocks, instructions and phi nodes.
//!
//! The pipeline assumes SSA form with single-entry functions, basic blocks
//! ending in a terminator, and phi nodes carrying one incoming entry per
//! predecessor edge. Blocks, values and instructions are stored in per-function
//! vectors and addressed by index refs, so references stay valid while new
//! blocks and instructions are appended during splicing.

use std::fmt;
use std::path::{Path, PathBuf};

pub mod parser;

/// Reference to a function within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncRef(pub u32);

/// Reference to a block within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef(pub u32);

/// Reference to a value (argument, constant or instruction result).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef(pub u32);

/// Reference to an instruction within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstRef(pub u32);

/// Value types understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Void,
    Int(u32),
    Float,
    Double,
    Ptr,
}

impl Type {
    /// Whether this is an integer type of any width.
    pub fn is_integer(self) -> bool {
        matches!(self, Type::Int(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{bits}"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Ptr => write!(f, "ptr"),
        }
    }
}

/// How a value comes into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    /// Function argument at the given position.
    Arg(u32),
    /// Result of an instruction.
    Inst(InstRef),
    /// Immediate constant; the value name holds the literal text.
    Const,
}

/// A value in a function.
#[derive(Debug, Clone)]
pub struct Value {
    pub name: String,
    pub ty: Type,
    pub def: ValueDef,
}

/// Instruction payloads.
#[derive(Debug, Clone)]
pub enum InstKind {
    /// Phi node with (incoming block, incoming value) pairs.
    Phi { incoming: Vec<(BlockRef, ValueRef)> },
    /// Call to a function in the module.
    Call { callee: FuncRef, args: Vec<ValueRef> },
    /// Unconditional branch.
    Br { target: BlockRef },
    /// Two-way conditional branch.
    CondBr {
        cond: ValueRef,
        then_target: BlockRef,
        else_target: BlockRef,
    },
    /// Function return.
    Ret { value: Option<ValueRef> },
    /// Generic computation with a textual opcode (add, load, store, ...).
    Op {
        opcode: String,
        operands: Vec<ValueRef>,
    },
}

impl InstKind {
    /// Whether this instruction ends a block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret { .. }
        )
    }

    /// Value operands of the instruction, including phi incoming values.
    pub fn operands(&self) -> Vec<ValueRef> {
        match self {
            InstKind::Phi { incoming } => incoming.iter().map(|(_, v)| *v).collect(),
            InstKind::Call { args, .. } => args.clone(),
            InstKind::Br { .. } => Vec::new(),
            InstKind::CondBr { cond, .. } => vec![*cond],
            InstKind::Ret { value } => value.iter().copied().collect(),
            InstKind::Op { operands, .. } => operands.clone(),
        }
    }

    /// Successor blocks, for terminators.
    pub fn successors(&self) -> Vec<BlockRef> {
        match self {
            InstKind::Br { target } => vec![*target],
            InstKind::CondBr {
                then_target,
                else_target,
                ..
            } => vec![*then_target, *else_target],
            _ => Vec::new(),
        }
    }
}

/// One instruction: an optional result value plus its payload.
#[derive(Debug, Clone)]
pub struct Inst {
    pub result: Option<ValueRef>,
    pub kind: InstKind,
}

/// A basic block: a name and an ordered instruction list.
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub insts: Vec<InstRef>,
}

/// A function definition or external declaration.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub declaration: bool,
    pub param_types: Vec<Type>,
    pub ret_ty: Type,
    args: Vec<ValueRef>,
    blocks: Vec<Block>,
    values: Vec<Value>,
    insts: Vec<Inst>,
}

impl Function {
    fn new(name: &str, declaration: bool, ret_ty: Type) -> Self {
        Self {
            name: name.to_string(),
            declaration,
            param_types: Vec::new(),
            ret_ty,
            args: Vec::new(),
            blocks: Vec::new(),
            values: Vec::new(),
            insts: Vec::new(),
        }
    }

    /// Argument values in declaration order.
    pub fn args(&self) -> &[ValueRef] {
        &self.args
    }

    pub fn value(&self, val: ValueRef) -> &Value {
        &self.values[val.0 as usize]
    }

    pub fn inst(&self, inst: InstRef) -> &Inst {
        &self.insts[inst.0 as usize]
    }

    pub fn block(&self, block: BlockRef) -> &Block {
        &self.blocks[block.0 as usize]
    }

    /// All blocks of the function.
    pub fn blocks(&self) -> impl Iterator<Item = BlockRef> + '_ {
        (0..self.blocks.len() as u32).map(BlockRef)
    }

    /// Look up a block by name.
    pub fn block_by_name(&self, name: &str) -> Option<BlockRef> {
        self.blocks
            .iter()
            .position(|b| b.name == name)
            .map(|i| BlockRef(i as u32))
    }

    /// Look up a value by name.
    pub fn value_by_name(&self, name: &str) -> Option<ValueRef> {
        self.values
            .iter()
            .position(|v| v.def != ValueDef::Const && v.name == name)
            .map(|i| ValueRef(i as u32))
    }

    fn add_value(&mut self, name: &str, ty: Type, def: ValueDef) -> ValueRef {
        let val = ValueRef(self.values.len() as u32);
        self.values.push(Value {
            name: name.to_string(),
            ty,
            def,
        });
        val
    }

    /// Append an argument; only meaningful while building the signature.
    pub fn add_arg(&mut self, name: &str, ty: Type) -> ValueRef {
        let index = self.args.len() as u32;
        self.param_types.push(ty);
        let val = self.add_value(name, ty, ValueDef::Arg(index));
        self.args.push(val);
        val
    }

    /// Intern an immediate constant.
    pub fn add_const(&mut self, literal: &str, ty: Type) -> ValueRef {
        self.add_value(literal, ty, ValueDef::Const)
    }

    /// Append an empty block.
    pub fn add_block(&mut self, name: &str) -> BlockRef {
        let block = BlockRef(self.blocks.len() as u32);
        self.blocks.push(Block {
            name: name.to_string(),
            insts: Vec::new(),
        });
        block
    }

    fn push_inst(&mut self, block: BlockRef, inst: Inst) -> InstRef {
        let inst_ref = InstRef(self.insts.len() as u32);
        self.insts.push(inst);
        self.blocks[block.0 as usize].insts.push(inst_ref);
        inst_ref
    }

    /// Append a phi node to a block.
    pub fn append_phi(
        &mut self,
        block: BlockRef,
        name: &str,
        ty: Type,
        incoming: Vec<(BlockRef, ValueRef)>,
    ) -> ValueRef {
        let inst_ref = InstRef(self.insts.len() as u32);
        let result = self.add_value(name, ty, ValueDef::Inst(inst_ref));
        self.push_inst(
            block,
            Inst {
                result: Some(result),
                kind: InstKind::Phi { incoming },
            },
        );
        result
    }

    /// Append a generic instruction; returns its result value if named.
    pub fn append_op(
        &mut self,
        block: BlockRef,
        result: Option<(&str, Type)>,
        opcode: &str,
        operands: Vec<ValueRef>,
    ) -> Option<ValueRef> {
        let inst_ref = InstRef(self.insts.len() as u32);
        let result = result.map(|(name, ty)| self.add_value(name, ty, ValueDef::Inst(inst_ref)));
        self.push_inst(
            block,
            Inst {
                result,
                kind: InstKind::Op {
                    opcode: opcode.to_string(),
                    operands,
                },
            },
        );
        result
    }

    /// Append a call instruction binding its result value.
    pub fn append_call(
        &mut self,
        block: BlockRef,
        result_name: &str,
        result_ty: Type,
        callee: FuncRef,
        args: Vec<ValueRef>,
    ) -> ValueRef {
        let inst_ref = InstRef(self.insts.len() as u32);
        let result = self.add_value(result_name, result_ty, ValueDef::Inst(inst_ref));
        self.push_inst(
            block,
            Inst {
                result: Some(result),
                kind: InstKind::Call { callee, args },
            },
        );
        result
    }

    /// Append a call instruction with no bound result.
    pub fn append_call_void(&mut self, block: BlockRef, callee: FuncRef, args: Vec<ValueRef>) {
        self.push_inst(
            block,
            Inst {
                result: None,
                kind: InstKind::Call { callee, args },
            },
        );
    }

    /// Append an unconditional branch.
    pub fn append_br(&mut self, block: BlockRef, target: BlockRef) {
        self.push_inst(
            block,
            Inst {
                result: None,
                kind: InstKind::Br { target },
            },
        );
    }

    /// Append a conditional branch.
    pub fn append_condbr(
        &mut self,
        block: BlockRef,
        cond: ValueRef,
        then_target: BlockRef,
        else_target: BlockRef,
    ) {
        self.push_inst(
            block,
            Inst {
                result: None,
                kind: InstKind::CondBr {
                    cond,
                    then_target,
                    else_target,
                },
            },
        );
    }

    /// Append a return.
    pub fn append_ret(&mut self, block: BlockRef, value: Option<ValueRef>) {
        self.push_inst(
            block,
            Inst {
                result: None,
                kind: InstKind::Ret { value },
            },
        );
    }

    /// Terminator of a block, if the block is terminated.
    pub fn terminator(&self, block: BlockRef) -> Option<InstRef> {
        let last = *self.blocks[block.0 as usize].insts.last()?;
        self.insts[last.0 as usize]
            .kind
            .is_terminator()
            .then_some(last)
    }

    /// Successor blocks of a block.
    pub fn successors(&self, block: BlockRef) -> Vec<BlockRef> {
        self.terminator(block)
            .map(|t| self.insts[t.0 as usize].kind.successors())
            .unwrap_or_default()
    }

    /// Rewrite every successor edge of `block` targeting `from` to target `to`.
    /// Returns the number of rewritten edges.
    pub fn redirect_successor(&mut self, block: BlockRef, from: BlockRef, to: BlockRef) -> usize {
        let Some(term) = self.terminator(block) else {
            return 0;
        };
        let mut rewritten = 0;
        match &mut self.insts[term.0 as usize].kind {
            InstKind::Br { target } => {
                if *target == from {
                    *target = to;
                    rewritten += 1;
                }
            }
            InstKind::CondBr {
                then_target,
                else_target,
                ..
            } => {
                if *then_target == from {
                    *then_target = to;
                    rewritten += 1;
                }
                if *else_target == from {
                    *else_target = to;
                    rewritten += 1;
                }
            }
            _ => {}
        }
        rewritten
    }

    /// Leading phi nodes of a block.
    pub fn block_phis(&self, block: BlockRef) -> Vec<InstRef> {
        self.blocks[block.0 as usize]
            .insts
            .iter()
            .copied()
            .take_while(|i| matches!(self.insts[i.0 as usize].kind, InstKind::Phi { .. }))
            .collect()
    }

    /// Incoming entries of a phi node.
    pub fn phi_incoming(&self, phi: InstRef) -> &[(BlockRef, ValueRef)] {
        match &self.insts[phi.0 as usize].kind {
            InstKind::Phi { incoming } => incoming,
            _ => &[],
        }
    }

    /// Extend a phi node with one more incoming entry.
    pub fn phi_add_incoming(&mut self, phi: InstRef, block: BlockRef, value: ValueRef) {
        if let InstKind::Phi { incoming } = &mut self.insts[phi.0 as usize].kind {
            incoming.push((block, value));
        }
    }

    /// Defining instruction of a value, if it is an instruction result.
    pub fn def_inst(&self, val: ValueRef) -> Option<InstRef> {
        match self.value(val).def {
            ValueDef::Inst(inst) => Some(inst),
            _ => None,
        }
    }

    pub(crate) fn phi_set_incoming_value(&mut self, phi: InstRef, slot: usize, value: ValueRef) {
        if let InstKind::Phi { incoming } = &mut self.insts[phi.0 as usize].kind {
            incoming[slot].1 = value;
        }
    }

    /// Block an instruction lives in, if it has been inserted.
    pub fn block_of(&self, inst: InstRef) -> Option<BlockRef> {
        self.blocks
            .iter()
            .position(|b| b.insts.contains(&inst))
            .map(|i| BlockRef(i as u32))
    }
}

/// A module: the translation unit the pipeline mutates in place.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    source_file: PathBuf,
    functions: Vec<Function>,
}

impl Module {
    pub fn new(name: &str, source_file: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            source_file: source_file.into(),
            functions: Vec::new(),
        }
    }

    /// Path of the source file this module was produced from.
    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn func(&self, func: FuncRef) -> &Function {
        &self.functions[func.0 as usize]
    }

    pub fn func_mut(&mut self, func: FuncRef) -> &mut Function {
        &mut self.functions[func.0 as usize]
    }

    pub fn funcs(&self) -> impl Iterator<Item = FuncRef> + '_ {
        (0..self.functions.len() as u32).map(FuncRef)
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncRef> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncRef(i as u32))
    }

    /// Add a function definition; arguments are appended via [`Function::add_arg`].
    pub fn add_function(&mut self, name: &str, ret_ty: Type) -> FuncRef {
        let func = FuncRef(self.functions.len() as u32);
        self.functions.push(Function::new(name, false, ret_ty));
        func
    }

    /// Declare an external function with the given signature.
    pub fn declare_function(&mut self, name: &str, param_types: Vec<Type>, ret_ty: Type) -> FuncRef {
        let func = FuncRef(self.functions.len() as u32);
        let mut f = Function::new(name, true, ret_ty);
        f.param_types = param_types;
        self.functions.push(f);
        func
    }

    /// Render a value the way the host printer does: arguments as `ty %name`,
    /// instruction results as their full defining instruction, constants as
    /// their literal text.
    pub fn print_value(&self, func: FuncRef, val: ValueRef) -> String {
        let f = self.func(func);
        let v = f.value(val);
        match v.def {
            ValueDef::Arg(_) => format!("{} %{}", v.ty, v.name),
            ValueDef::Inst(inst) => self.print_inst(func, inst),
            ValueDef::Const => v.name.clone(),
        }
    }

    fn operand_text(&self, f: &Function, val: ValueRef) -> String {
        let v = f.value(val);
        match v.def {
            ValueDef::Const => v.name.clone(),
            _ => format!("%{}", v.name),
        }
    }

    /// Render one instruction as a single line without indentation.
    pub fn print_inst(&self, func: FuncRef, inst: InstRef) -> String {
        let f = self.func(func);
        let i = f.inst(inst);
        let mut out = String::new();
        if let Some(result) = i.result {
            out.push_str(&format!("%{} = ", f.value(result).name));
        }
        match &i.kind {
            InstKind::Phi { incoming } => {
                let ty = i.result.map(|r| f.value(r).ty).unwrap_or(Type::Void);
                out.push_str(&format!("phi {ty} "));
                let entries: Vec<String> = incoming
                    .iter()
                    .map(|(block, val)| {
                        format!("[^{}, {}]", f.block(*block).name, self.operand_text(f, *val))
                    })
                    .collect();
                out.push_str(&entries.join(", "));
            }
            InstKind::Call { callee, args } => {
                let arg_texts: Vec<String> =
                    args.iter().map(|a| self.operand_text(f, *a)).collect();
                // Result-bearing calls carry the result type, matching the
                // parser's grammar.
                if let Some(result) = i.result {
                    out.push_str(&format!("call {} ", f.value(result).ty));
                } else {
                    out.push_str("call ");
                }
                out.push_str(&format!(
                    "@{}({})",
                    self.func(*callee).name,
                    arg_texts.join(", ")
                ));
            }
            InstKind::Br { target } => {
                out.push_str(&format!("br ^{}", f.block(*target).name));
            }
            InstKind::CondBr {
                cond,
                then_target,
                else_target,
            } => {
                out.push_str(&format!(
                    "condbr {}, ^{}, ^{}",
                    self.operand_text(f, *cond),
                    f.block(*then_target).name,
                    f.block(*else_target).name
                ));
            }
            InstKind::Ret { value } => match value {
                Some(v) => out.push_str(&format!("ret {}", self.operand_text(f, *v))),
                None => out.push_str("ret"),
            },
            InstKind::Op { opcode, operands } => {
                let ty = i.result.map(|r| f.value(r).ty);
                let operand_texts: Vec<String> =
                    operands.iter().map(|o| self.operand_text(f, *o)).collect();
                match ty {
                    Some(ty) => out.push_str(&format!("{opcode} {ty} ")),
                    None => out.push_str(&format!("{opcode} ")),
                }
                out.push_str(&operand_texts.join(", "));
            }
        }
        out
    }

    /// Render one block, instructions indented under the label.
    pub fn print_block(&self, func: FuncRef, block: BlockRef) -> String {
        let f = self.func(func);
        let mut out = format!("{}:\n", f.block(block).name);
        for inst in &f.block(block).insts {
            out.push_str("  ");
            out.push_str(&self.print_inst(func, *inst));
            out.push('\n');
        }
        out
    }

    /// Deterministic textual dump of the whole module.
    pub fn print(&self) -> String {
        let mut out = format!("module {} (source: {})\n", self.name, self.source_file.display());
        for func in self.funcs() {
            let f = self.func(func);
            out.push('\n');
            if f.declaration {
                let params: Vec<String> = f.param_types.iter().map(|t| t.to_string()).collect();
                out.push_str(&format!(
                    "extern @{}({}) -> {}\n",
                    f.name,
                    params.join(", "),
                    f.ret_ty
                ));
                continue;
            }
            let params: Vec<String> = f
                .args
                .iter()
                .map(|a| {
                    let v = f.value(*a);
                    format!("{} %{}", v.ty, v.name)
                })
                .collect();
            out.push_str(&format!("func @{}({}) -> {} {{\n", f.name, params.join(", "), f.ret_ty));
            for block in f.blocks() {
                out.push_str(&self.print_block(func, block));
            }
            out.push_str("}\n");
        }
        out
    }
}
