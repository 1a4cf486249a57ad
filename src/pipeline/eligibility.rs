// This module decides whether a region may be legally replaced. The check is pure: it
// reads the region model and the module and mutates nothing. A region is eligible when
// no value defined inside it is used outside (uses by exit-block phi nodes are exempt,
// since those are modeled as join-value entities and re-wired by the splicer) and every
// parameter is integer-typed with a classifiable defining value. Anything the upstream
// analyses left malformed fails closed: the checker rejects rather than guesses, which
// is what lets the splicer treat resolution failures as contract violations.

//! Eligibility gate for region replacement.

use crate::ir::Module;
use crate::scop::{ParamValue, Scop};
use hashbrown::HashSet;
use thiserror::Error;

/// Why a region cannot be transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Ineligibility {
    /// A value defined inside the region is used beyond it.
    #[error("escaping value")]
    EscapingValue,
    /// A parameter's declared type is not an integer type.
    #[error("non-integral parameter")]
    NonIntegralParameter,
    /// A parameter's defining value could not be classified upstream.
    #[error("malformed parameter")]
    MalformedParameter,
}

/// Check all eligibility rules. Pure; no side effects.
pub fn check(scop: &Scop, module: &Module) -> Result<(), Ineligibility> {
    if has_escaping_value(scop, module) {
        return Err(Ineligibility::EscapingValue);
    }
    for param in scop.parameters() {
        if !param.ty.is_integer() {
            return Err(Ineligibility::NonIntegralParameter);
        }
        if param.value == ParamValue::Opaque {
            return Err(Ineligibility::MalformedParameter);
        }
    }
    Ok(())
}

/// Boolean wrapper over [`check`] that reports the rejection reason.
pub fn is_eligible(scop: &Scop, module: &Module) -> bool {
    match check(scop, module) {
        Ok(()) => true,
        Err(reason) => {
            log::info!("region {} rejected: {}", scop.name(), reason);
            false
        }
    }
}

fn has_escaping_value(scop: &Scop, module: &Module) -> bool {
    let f = module.func(scop.func());
    let region = scop.region();

    let mut defined = HashSet::new();
    for &block in &region.blocks {
        for &inst in &f.block(block).insts {
            if let Some(result) = f.inst(inst).result {
                defined.insert(result);
            }
        }
    }

    let exit_phis: Vec<_> = f.block_phis(region.exit);
    for block in f.blocks() {
        if region.contains(block) {
            continue;
        }
        for &inst in &f.block(block).insts {
            if exit_phis.contains(&inst) {
                continue;
            }
            if f.inst(inst)
                .kind
                .operands()
                .iter()
                .any(|op| defined.contains(op))
            {
                return true;
            }
        }
    }
    false
}
