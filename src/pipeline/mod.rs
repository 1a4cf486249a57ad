// This module drives the per-region pipeline: eligibility gate, payload export,
// generator invocation and the transactional splice, in that order. Each region moves
// through the states Detected -> Validated -> Exported -> Generated -> Spliced ->
// Finalized; any failure before generation leaves the module untouched and reports the
// region as rejected, and mutation is confined entirely to the Generated -> Spliced
// edge. All per-region errors are local: a rejection never aborts the enclosing
// compilation and a rejected region is never retried within the same run. The pipeline
// also owns the cross-region bookkeeping for one module: the set of consumed unit names
// (two regions whose names sanitize to the same unit would silently collide on the
// generated symbols, so the second one is rejected before the generator runs) and the
// set of finalized regions that must not be reprocessed.

//! Per-region pipeline driver.

use crate::export::{export, ExportError};
use crate::generate::{GenerateRequest, Generator, GeneratorError, GeneratorOptions, UnitName};
use crate::ir::Module;
use crate::scop::{AnalysisLevel, DependenceInfo, Scop};
use crate::splice::{SplicePlan, SpliceError};
use hashbrown::HashSet;
use thiserror::Error;

pub mod eligibility;

pub use eligibility::{check, is_eligible, Ineligibility};

/// Pipeline configuration, threaded explicitly into every instance.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub generator_options: GeneratorOptions,
}

/// Processing states of one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    Detected,
    Validated,
    Exported,
    Generated,
    Spliced,
    Finalized,
}

/// Why a region was left untouched.
#[derive(Debug, Error)]
pub enum RejectReason {
    #[error("{0}")]
    Ineligible(#[from] Ineligibility),
    #[error("no statement-level dependences available")]
    MissingDependences,
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("unit name '{0}' already consumed by another region")]
    UnitNameCollision(String),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Splice(#[from] SpliceError),
    #[error("region already finalized")]
    AlreadyFinalized,
}

/// Result of running the pipeline on one region.
#[derive(Debug)]
pub enum RegionOutcome {
    /// The region was replaced by calls into the named unit.
    Transformed(UnitName),
    /// The module is unchanged.
    Untouched(RejectReason),
}

impl RegionOutcome {
    pub fn is_transformed(&self) -> bool {
        matches!(self, RegionOutcome::Transformed(_))
    }
}

/// Pipeline instance for one module.
pub struct Pipeline<'g> {
    config: PipelineConfig,
    generator: &'g dyn Generator,
    consumed_units: HashSet<String>,
    finalized: HashSet<String>,
}

impl<'g> Pipeline<'g> {
    pub fn new(config: PipelineConfig, generator: &'g dyn Generator) -> Self {
        Self {
            config,
            generator,
            consumed_units: HashSet::new(),
            finalized: HashSet::new(),
        }
    }

    /// Whether a region has already been consumed by a successful splice.
    pub fn is_finalized(&self, region: &str) -> bool {
        self.finalized.contains(region)
    }

    /// Run the pipeline to completion (or rejection) for one region.
    pub fn process(
        &mut self,
        module: &mut Module,
        scop: &Scop,
        deps: &dyn DependenceInfo,
    ) -> RegionOutcome {
        let function = &module.func(scop.func()).name;
        log::info!("region {} in function {}", scop.name(), function);
        if self.is_finalized(scop.name()) {
            return RegionOutcome::Untouched(RejectReason::AlreadyFinalized);
        }
        let mut state = RegionState::Detected;
        log::debug!("region {}: {:?}", scop.name(), state);

        if let Err(reason) = eligibility::check(scop, module) {
            log::info!("region {} rejected: {}", scop.name(), reason);
            return RegionOutcome::Untouched(reason.into());
        }
        state = RegionState::Validated;
        log::debug!("region {}: {:?}", scop.name(), state);

        let Some(deps) = deps.get(scop.name(), AnalysisLevel::Statement) else {
            log::warn!("region {}: no statement-level dependences", scop.name());
            return RegionOutcome::Untouched(RejectReason::MissingDependences);
        };
        let payload = match export(scop, deps, module) {
            Ok(payload) => payload,
            Err(err) => {
                log::info!("region {} rejected: {}", scop.name(), err);
                return RegionOutcome::Untouched(err.into());
            }
        };
        state = RegionState::Exported;
        log::debug!("region {}: {:?}", scop.name(), state);

        // Guard the shared unit namespace before spawning the generator: a
        // colliding invocation would overwrite the earlier region's unit.
        let unit = UnitName::derive(module.source_file(), scop.name());
        if self.consumed_units.contains(unit.as_str()) {
            log::warn!(
                "region {} rejected: unit name '{}' already consumed",
                scop.name(),
                unit
            );
            return RegionOutcome::Untouched(RejectReason::UnitNameCollision(
                unit.as_str().to_string(),
            ));
        }

        let request = GenerateRequest {
            source_path: module.source_file(),
            region: scop.name(),
            payload: &payload,
            options: &self.config.generator_options,
        };
        let unit = match self.generator.invoke(&request) {
            Ok(unit) => unit,
            Err(err) => {
                log::info!("region {} rejected: {}", scop.name(), err);
                return RegionOutcome::Untouched(err.into());
            }
        };
        state = RegionState::Generated;
        log::debug!("region {}: {:?}", scop.name(), state);

        // From here on the graph is mutated; prepare() is the last fallible
        // step and runs against the untouched module.
        let plan = match SplicePlan::prepare(scop, module, &unit) {
            Ok(plan) => plan,
            Err(err) => {
                // Contract violation between the eligibility gate and the
                // splicer; fatal for this region only.
                log::error!("region {}: splice planning failed: {}", scop.name(), err);
                return RegionOutcome::Untouched(err.into());
            }
        };
        plan.commit(module);
        state = RegionState::Spliced;
        log::debug!("region {}: {:?}", scop.name(), state);

        self.consumed_units.insert(unit.as_str().to_string());
        self.finalized.insert(scop.name().to_string());
        state = RegionState::Finalized;
        log::info!(
            "region {}: {:?}, replaced by unit {}",
            scop.name(),
            state,
            unit
        );
        RegionOutcome::Transformed(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::GeneratorError;
    use crate::ir::parser::parse_module;
    use crate::ir::{InstKind, Type};
    use crate::scop::{
        Access, Dependences, DimSize, MapDependenceInfo, MemoryEntity, ParamValue, Region,
        ScopBuilder, Statement,
    };
    use serde_json::Value;
    use std::cell::RefCell;

    /// In-process stand-in for the external generator.
    #[derive(Default)]
    struct FakeGenerator {
        fail: bool,
        requests: RefCell<Vec<(String, bool)>>,
    }

    impl FakeGenerator {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    impl Generator for FakeGenerator {
        fn invoke(&self, request: &GenerateRequest<'_>) -> Result<UnitName, GeneratorError> {
            self.requests
                .borrow_mut()
                .push((request.payload.to_string(), request.options.transfer_tune));
            if self.fail {
                return Err(GeneratorError::Unavailable(std::io::Error::other(
                    "fake generator failure",
                )));
            }
            Ok(UnitName::derive(request.source_path, request.region))
        }
    }

    const SUM: &str = r#"
source "loop.c"
func @kernel(i64 %n, ptr %A) -> void {
entry:
  br ^header
header:
  %i = phi i64 [^entry, 0], [^latch, %inc]
  %cmp = icmp_slt i1 %i, %n
  condbr %cmp, ^body, ^exit
body:
  %v = load double %A
  br ^latch
latch:
  %inc = add i64 %i, 1
  br ^header
exit:
  %out = phi i64 [^header, %i]
  ret
}
"#;

    const ESCAPING: &str = r#"
source "loop.c"
func @kernel(i64 %n, ptr %A) -> void {
entry:
  br ^header
header:
  %i = phi i64 [^entry, 0], [^latch, %inc]
  %cmp = icmp_slt i1 %i, %n
  condbr %cmp, ^body, ^exit
body:
  %v = load double %A
  br ^latch
latch:
  %inc = add i64 %i, 1
  br ^header
exit:
  %twice = add i64 %i, %i
  ret
}
"#;

    fn scop_named(module: &Module, name: &str) -> Scop {
        let func = module.func_by_name("kernel").unwrap();
        let f = module.func(func);
        let block = |n: &str| f.block_by_name(n).unwrap();
        let region = Region {
            entering: block("entry"),
            exiting: block("header"),
            exit: block("exit"),
            blocks: vec![block("header"), block("body"), block("latch")],
        };
        let n = f.args()[0];
        let a = f.args()[1];
        ScopBuilder::new(name, func, region)
            .context("[n] -> { : n > 0 }")
            .schedule("{ S0[i] -> [i] }")
            .parameter("n", ParamValue::Symbol(n), Type::Int(64))
            .entity(MemoryEntity::array(
                "A",
                Type::Double,
                vec![DimSize::Sized("%n".to_string())],
                a,
            ))
            .statement({
                let mut stmt = Statement::new("S0", "[n] -> { S0[i] : 0 <= i < n }");
                stmt.accesses
                    .push(Access::read("{ S0[i] -> A[i] }", "%v = load double %A"));
                stmt
            })
            .build(module)
            .unwrap()
    }

    fn statement_deps(region: &str) -> MapDependenceInfo {
        let mut info = MapDependenceInfo::new();
        info.insert(region, AnalysisLevel::Statement, Dependences::default());
        info
    }

    #[test]
    fn test_scenario_a_eligible_region_exports_expected_shape() {
        let mut module = parse_module(SUM).unwrap();
        let scop = scop_named(&module, "%R");
        let generator = FakeGenerator::default();
        let mut pipeline = Pipeline::new(PipelineConfig::default(), &generator);

        let outcome = pipeline.process(&mut module, &scop, &statement_deps("%R"));
        assert!(outcome.is_transformed());

        let requests = generator.requests.borrow();
        assert_eq!(requests.len(), 1);
        let payload: Value = serde_json::from_str(&requests[0].0).unwrap();
        assert_eq!(payload["parameters"].as_array().unwrap().len(), 1);
        assert_eq!(payload["arrays"].as_array().unwrap().len(), 1);
        assert_eq!(payload["statements"].as_array().unwrap().len(), 1);
        assert_eq!(
            payload["statements"][0]["accesses"].as_array().unwrap().len(),
            1
        );
        // The tuning toggle travels with the request, default on.
        assert!(requests[0].1);
    }

    #[test]
    fn test_scenario_b_escaping_region_is_rejected_before_export() {
        let mut module = parse_module(ESCAPING).unwrap();
        let scop = scop_named(&module, "%R");
        let generator = FakeGenerator::default();
        let mut pipeline = Pipeline::new(PipelineConfig::default(), &generator);

        let before = module.print();
        let outcome = pipeline.process(&mut module, &scop, &statement_deps("%R"));
        assert!(matches!(
            outcome,
            RegionOutcome::Untouched(RejectReason::Ineligible(Ineligibility::EscapingValue))
        ));
        assert_eq!(module.print(), before);
        assert!(generator.requests.borrow().is_empty());
    }

    #[test]
    fn test_scenario_c_generator_failure_leaves_graph_unchanged() {
        let mut module = parse_module(SUM).unwrap();
        let scop = scop_named(&module, "%R");
        let generator = FakeGenerator::failing();
        let mut pipeline = Pipeline::new(PipelineConfig::default(), &generator);

        let before = module.print();
        let outcome = pipeline.process(&mut module, &scop, &statement_deps("%R"));
        assert!(matches!(
            outcome,
            RegionOutcome::Untouched(RejectReason::Generator(_))
        ));
        assert_eq!(module.print(), before);
        assert!(!pipeline.is_finalized("%R"));
    }

    #[test]
    fn test_scenario_d_successful_splice_rewires_the_graph() {
        let mut module = parse_module(SUM).unwrap();
        let scop = scop_named(&module, "%R");
        let generator = FakeGenerator::default();
        let mut pipeline = Pipeline::new(PipelineConfig::default(), &generator);

        let outcome = pipeline.process(&mut module, &scop, &statement_deps("%R"));
        let RegionOutcome::Transformed(unit) = outcome else {
            panic!("expected transformation");
        };
        assert_eq!(unit.as_str(), "loopc_R");

        let func = module.func_by_name("kernel").unwrap();
        let f = module.func(func);
        let entry = f.block_by_name("entry").unwrap();
        let exit = f.block_by_name("exit").unwrap();
        let spliced = f.block_by_name("loopc_R_splice").unwrap();

        assert_eq!(f.successors(entry), vec![spliced]);
        assert_eq!(f.successors(spliced), vec![exit]);

        let callees: Vec<String> = f
            .block(spliced)
            .insts
            .iter()
            .filter_map(|&inst| match &f.inst(inst).kind {
                InstKind::Call { callee, .. } => Some(module.func(*callee).name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            callees,
            vec!["__init_loopc_R", "__program_loopc_R", "__exit_loopc_R"]
        );

        // The exit-block join gained a matching entry from the new block.
        let phi = f.block_phis(exit)[0];
        let incoming = f.phi_incoming(phi);
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[1].0, spliced);
        assert_eq!(incoming[1].1, incoming[0].1);

        assert!(pipeline.is_finalized("%R"));
    }

    #[test]
    fn test_finalized_region_is_not_reprocessed() {
        let mut module = parse_module(SUM).unwrap();
        let scop = scop_named(&module, "%R");
        let generator = FakeGenerator::default();
        let mut pipeline = Pipeline::new(PipelineConfig::default(), &generator);

        assert!(pipeline
            .process(&mut module, &scop, &statement_deps("%R"))
            .is_transformed());
        let again = pipeline.process(&mut module, &scop, &statement_deps("%R"));
        assert!(matches!(
            again,
            RegionOutcome::Untouched(RejectReason::AlreadyFinalized)
        ));
        assert_eq!(generator.requests.borrow().len(), 1);
    }

    #[test]
    fn test_colliding_unit_names_are_rejected_before_invocation() {
        let mut module = parse_module(SUM).unwrap();
        // "%R-1" and "%R_1" both sanitize to unit "loopc_R_1".
        let first = scop_named(&module, "%R-1");
        let second = scop_named(&module, "%R_1");
        let generator = FakeGenerator::default();
        let mut pipeline = Pipeline::new(PipelineConfig::default(), &generator);

        let mut deps = statement_deps("%R-1");
        deps.insert("%R_1", AnalysisLevel::Statement, Dependences::default());

        assert!(pipeline.process(&mut module, &first, &deps).is_transformed());
        let outcome = pipeline.process(&mut module, &second, &deps);
        assert!(matches!(
            outcome,
            RegionOutcome::Untouched(RejectReason::UnitNameCollision(ref unit)) if unit == "loopc_R_1"
        ));
        assert_eq!(generator.requests.borrow().len(), 1);
    }

    #[test]
    fn test_missing_dependences_fail_closed() {
        let mut module = parse_module(SUM).unwrap();
        let scop = scop_named(&module, "%R");
        let generator = FakeGenerator::default();
        let mut pipeline = Pipeline::new(PipelineConfig::default(), &generator);

        let before = module.print();
        let outcome = pipeline.process(&mut module, &scop, &MapDependenceInfo::new());
        assert!(matches!(
            outcome,
            RegionOutcome::Untouched(RejectReason::MissingDependences)
        ));
        assert_eq!(module.print(), before);
    }
}
