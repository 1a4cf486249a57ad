// This module performs the transactional control-flow rewrite that replaces a region
// with calls into a generated unit. The rewrite is split into two phases so a late
// failure can never leave the graph half-mutated: SplicePlan::prepare resolves every
// fallible ingredient (parameter values, the program-call argument order, the exit-block
// phi entries fed by the exiting block) against the unmodified module, and commit then
// applies the buffered edits without any fallible step: declare the three entry-point
// symbols, build the replacement block with the init/program/exit call sequence and the
// branch to the exit block, redirect the entering block's edge, and extend each affected
// exit-block phi with a matching incoming entry from the new block. The region's
// internal blocks become unreachable and are left for later cleanup passes.

//! Transactional splice of a region into generated-unit calls.

use crate::generate::UnitName;
use crate::ir::{BlockRef, FuncRef, InstRef, Module, Type, ValueRef};
use crate::scop::Scop;
use thiserror::Error;

/// Errors raised while planning a splice.
///
/// These are contract violations: the eligibility gate guarantees by
/// construction that planning cannot fail for a region it admitted.
#[derive(Debug, Error)]
pub enum SpliceError {
    #[error("parameter '{0}' cannot be resolved to a concrete value")]
    UnresolvedParameter(String),
}

/// Buffered mutation plan for one region splice.
///
/// Everything fallible happens in [`SplicePlan::prepare`]; [`SplicePlan::commit`]
/// only applies edits and cannot fail.
#[derive(Debug)]
pub struct SplicePlan {
    func: FuncRef,
    unit: UnitName,
    block_name: String,
    handle_name: String,
    /// Parameter values, in declaration order. Passed to init and repeated
    /// at the tail of the program call.
    param_args: Vec<ValueRef>,
    param_types: Vec<Type>,
    /// Array base references (sorted-array order) followed by scalar base
    /// references (sorted-scalar order).
    base_args: Vec<ValueRef>,
    base_types: Vec<Type>,
    entering: BlockRef,
    region_entry: BlockRef,
    exit: BlockRef,
    /// Exit-block phi nodes fed by the exiting block, with the value each
    /// one received along that edge.
    phi_patches: Vec<(InstRef, ValueRef)>,
}

impl SplicePlan {
    /// Resolve all splice ingredients against the unmodified module.
    pub fn prepare(scop: &Scop, module: &Module, unit: &UnitName) -> Result<Self, SpliceError> {
        let f = module.func(scop.func());
        let region = scop.region();

        let mut param_args = Vec::with_capacity(scop.parameters().len());
        for param in scop.parameters() {
            let value = param
                .value
                .resolved()
                .ok_or_else(|| SpliceError::UnresolvedParameter(param.name.clone()))?;
            param_args.push(value);
        }
        let param_types: Vec<Type> = param_args.iter().map(|v| f.value(*v).ty).collect();

        let mut base_args = Vec::new();
        for entity in scop.arrays() {
            base_args.push(entity.base);
        }
        for entity in scop.scalars() {
            base_args.push(entity.base);
        }
        let base_types: Vec<Type> = base_args.iter().map(|v| f.value(*v).ty).collect();

        let mut phi_patches = Vec::new();
        for phi in f.block_phis(region.exit) {
            let from_exiting = f
                .phi_incoming(phi)
                .iter()
                .find(|(block, _)| *block == region.exiting);
            if let Some(&(_, value)) = from_exiting {
                phi_patches.push((phi, value));
            }
        }

        Ok(Self {
            func: scop.func(),
            unit: unit.clone(),
            block_name: format!("{}_splice", unit.as_str()),
            handle_name: format!("{}_state", unit.as_str()),
            param_args,
            param_types,
            base_args,
            base_types,
            entering: region.entering,
            region_entry: region.entry(),
            exit: region.exit,
            phi_patches,
        })
    }

    /// Apply the buffered edits. Returns the replacement block.
    pub fn commit(self, module: &mut Module) -> BlockRef {
        // Entry-point declarations: init takes the parameters and returns the
        // opaque handle; program takes handle, bases and parameters; exit
        // takes the handle.
        let init = module.declare_function(
            &self.unit.init_symbol(),
            self.param_types.clone(),
            Type::Ptr,
        );
        let mut program_params = Vec::with_capacity(1 + self.base_types.len() + self.param_types.len());
        program_params.push(Type::Ptr);
        program_params.extend(self.base_types.iter().copied());
        program_params.extend(self.param_types.iter().copied());
        let program = module.declare_function(&self.unit.program_symbol(), program_params, Type::Void);
        let teardown = module.declare_function(&self.unit.exit_symbol(), vec![Type::Ptr], Type::Void);

        let f = module.func_mut(self.func);
        let block = f.add_block(&self.block_name);
        let handle = f.append_call(block, &self.handle_name, Type::Ptr, init, self.param_args.clone());

        let mut run_args = Vec::with_capacity(1 + self.base_args.len() + self.param_args.len());
        run_args.push(handle);
        run_args.extend(self.base_args.iter().copied());
        run_args.extend(self.param_args.iter().copied());
        f.append_call_void(block, program, run_args);
        f.append_call_void(block, teardown, vec![handle]);
        f.append_br(block, self.exit);

        f.redirect_successor(self.entering, self.region_entry, block);
        for (phi, value) in self.phi_patches {
            f.phi_add_incoming(phi, block, value);
        }

        log::debug!(
            "spliced region into block '{}' calling unit {}",
            self.block_name,
            self.unit
        );
        block
    }
}
