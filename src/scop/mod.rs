// This module defines the region model: the read-only, per-region view of the host
// analysis results that the rest of the pipeline consumes. A Scop bundles the region
// geometry (entering/exiting/exit blocks plus the member blocks), the integer parameters
// with their defining-value classification, the memory entities touched inside the region
// (arrays, scalars and control-flow join values as a closed sum over EntityKind), the
// statements with their iteration domains and ordered accesses, and the conservative
// alias groups. Dependence relations arrive from the host's dependence analysis through
// the DependenceInfo query trait, keyed by region name and analysis level. The model is
// constructed fresh per region through ScopBuilder, which validates the single-entry/
// single-exit region shape and fails closed on malformed input, and is discarded once
// the region is finalized or rejected.

//! Region model: scops, parameters, memory entities, statements and accesses.
//!
//! Memory entities are partitioned into three disjoint groups for
//! serialization and argument passing: arrays, scalars and join values. The
//! sorted views [`Scop::arrays`], [`Scop::scalars`] and [`Scop::join_values`]
//! are the single source of ordering truth; the exporter and the splicer both
//! go through them so the payload layout and the call argument order can
//! never disagree.

use crate::ir::{BlockRef, Function, FuncRef, Module, Type, ValueRef};
use hashbrown::HashMap;
use thiserror::Error;

/// Errors raised while assembling or validating a region model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("region has no blocks")]
    EmptyRegion,
    #[error("entering block '{0}' has no edge into the region")]
    NoEnteringEdge(String),
    #[error("exiting block '{0}' is not a region member")]
    ExitingOutsideRegion(String),
    #[error("exit block '{0}' is a region member")]
    ExitInsideRegion(String),
    #[error("exiting block '{0}' has no edge to the exit block")]
    NoExitingEdge(String),
}

/// A single-entry/single-exit subgraph of the control-flow graph.
///
/// `blocks` are the region members; `entering` is the unique predecessor
/// outside the region, `exiting` the unique member with an edge to `exit`,
/// and `exit` the shared successor outside the region. The region entry is
/// `blocks[0]`.
#[derive(Debug, Clone)]
pub struct Region {
    pub entering: BlockRef,
    pub exiting: BlockRef,
    pub exit: BlockRef,
    pub blocks: Vec<BlockRef>,
}

impl Region {
    /// First block executed inside the region.
    pub fn entry(&self) -> BlockRef {
        self.blocks[0]
    }

    /// Whether a block belongs to the region.
    pub fn contains(&self, block: BlockRef) -> bool {
        self.blocks.contains(&block)
    }

    fn validate(&self, f: &Function) -> Result<(), ModelError> {
        if self.blocks.is_empty() {
            return Err(ModelError::EmptyRegion);
        }
        let name = |b: BlockRef| f.block(b).name.clone();
        if self.contains(self.entering) || !f.successors(self.entering).contains(&self.entry()) {
            return Err(ModelError::NoEnteringEdge(name(self.entering)));
        }
        if !self.contains(self.exiting) {
            return Err(ModelError::ExitingOutsideRegion(name(self.exiting)));
        }
        if self.contains(self.exit) {
            return Err(ModelError::ExitInsideRegion(name(self.exit)));
        }
        if !f.successors(self.exiting).contains(&self.exit) {
            return Err(ModelError::NoExitingEdge(name(self.exiting)));
        }
        Ok(())
    }
}

/// Classification of a parameter's defining value.
///
/// Scalar evolution classifies each parameter as either a free symbol or the
/// induction variable of an affine recurrence. Anything else is `Opaque` and
/// makes the region ineligible; the exporter and splicer refuse it as well,
/// so an unclassifiable parameter can never reach the graph rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamValue {
    /// Free symbol: the value itself is loop-invariant in the region.
    Symbol(ValueRef),
    /// Affine recurrence: the induction variable of the surrounding loop.
    Induction(ValueRef),
    /// Unclassifiable defining value.
    Opaque,
}

impl ParamValue {
    /// Concrete value to marshal at call sites, if one exists.
    pub fn resolved(self) -> Option<ValueRef> {
        match self {
            ParamValue::Symbol(v) | ParamValue::Induction(v) => Some(v),
            ParamValue::Opaque => None,
        }
    }
}

/// A scalar quantity invariant within one execution of the region.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: ParamValue,
    pub ty: Type,
}

/// Kind tag of a memory entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Multi-dimensional array.
    Array,
    /// Scalar value communicated through memory.
    Scalar,
    /// Control-flow join value inside the region.
    Phi,
    /// Join value materialized past the region exit.
    ExitPhi,
}

/// One dimension extent of an array entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimSize {
    /// Extent known as an expression over parameters.
    Sized(String),
    /// Unbounded dimension, serialized as the wildcard `*`.
    Unbounded,
}

/// A storage location touched inside the region.
#[derive(Debug, Clone)]
pub struct MemoryEntity {
    pub name: String,
    pub kind: EntityKind,
    pub element_ty: Type,
    pub sizes: Vec<DimSize>,
    pub base: ValueRef,
}

impl MemoryEntity {
    pub fn array(name: &str, element_ty: Type, sizes: Vec<DimSize>, base: ValueRef) -> Self {
        Self {
            name: name.to_string(),
            kind: EntityKind::Array,
            element_ty,
            sizes,
            base,
        }
    }

    pub fn scalar(name: &str, element_ty: Type, base: ValueRef) -> Self {
        Self {
            name: name.to_string(),
            kind: EntityKind::Scalar,
            element_ty,
            sizes: Vec::new(),
            base,
        }
    }

    pub fn phi(name: &str, element_ty: Type, base: ValueRef) -> Self {
        Self {
            name: name.to_string(),
            kind: EntityKind::Phi,
            element_ty,
            sizes: Vec::new(),
            base,
        }
    }

    pub fn exit_phi(name: &str, element_ty: Type, base: ValueRef) -> Self {
        Self {
            name: name.to_string(),
            kind: EntityKind::ExitPhi,
            element_ty,
            sizes: Vec::new(),
            base,
        }
    }
}

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One memory reference performed by a statement.
#[derive(Debug, Clone)]
pub struct Access {
    pub kind: AccessKind,
    /// Relation mapping iteration points to accessed elements.
    pub relation: String,
    /// Textual form of the referencing instruction.
    pub instruction: String,
    /// For writes: textual form of the stored value, when determinable.
    pub stored_value: Option<String>,
}

impl Access {
    pub fn read(relation: &str, instruction: &str) -> Self {
        Self {
            kind: AccessKind::Read,
            relation: relation.to_string(),
            instruction: instruction.to_string(),
            stored_value: None,
        }
    }

    pub fn write(relation: &str, instruction: &str, stored_value: Option<&str>) -> Self {
        Self {
            kind: AccessKind::Write,
            relation: relation.to_string(),
            instruction: instruction.to_string(),
            stored_value: stored_value.map(str::to_string),
        }
    }
}

/// One atomic unit of computation inside the region.
#[derive(Debug, Clone)]
pub struct Statement {
    pub name: String,
    /// Iteration domain as a parametric polyhedron description.
    pub domain: String,
    /// True when the statement is a single plain block without internal
    /// control flow.
    pub affine: bool,
    /// Induction-variable text per enclosing loop depth; `None` marks a
    /// depth with no represented loop.
    pub loops: Vec<Option<String>>,
    pub accesses: Vec<Access>,
}

impl Statement {
    pub fn new(name: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            domain: domain.to_string(),
            affine: true,
            loops: Vec::new(),
            accesses: Vec::new(),
        }
    }
}

/// Minimal and maximal access-range pair of one alias-group member.
#[derive(Debug, Clone)]
pub struct AccessRange {
    pub minimal: String,
    pub maximal: String,
}

/// Partition of arrays into conservative read-write/read-only range pairs.
#[derive(Debug, Clone, Default)]
pub struct AliasGroup {
    pub readwrite: Vec<AccessRange>,
    pub readonly: Vec<AccessRange>,
}

/// The five dependence relations over statement-instance pairs.
#[derive(Debug, Clone, Default)]
pub struct Dependences {
    pub raw: String,
    pub war: String,
    pub waw: String,
    pub red: String,
    pub tc_red: String,
}

/// Granularity of a dependence-analysis query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisLevel {
    Statement,
    Reference,
    Access,
}

/// Inbound query contract for precomputed dependence relations.
pub trait DependenceInfo {
    fn get(&self, region: &str, level: AnalysisLevel) -> Option<&Dependences>;
}

/// Map-backed [`DependenceInfo`] for tests and demo drivers.
#[derive(Debug, Default)]
pub struct MapDependenceInfo {
    map: HashMap<(String, AnalysisLevel), Dependences>,
}

impl MapDependenceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: &str, level: AnalysisLevel, deps: Dependences) {
        self.map.insert((region.to_string(), level), deps);
    }
}

impl DependenceInfo for MapDependenceInfo {
    fn get(&self, region: &str, level: AnalysisLevel) -> Option<&Dependences> {
        self.map.get(&(region.to_string(), level))
    }
}

/// The complete region model handed through the pipeline.
#[derive(Debug, Clone)]
pub struct Scop {
    name: String,
    func: FuncRef,
    region: Region,
    context: String,
    schedule: String,
    parameters: Vec<Parameter>,
    entities: Vec<MemoryEntity>,
    statements: Vec<Statement>,
    alias_groups: Vec<AliasGroup>,
}

impl Scop {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn func(&self) -> FuncRef {
        self.func
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Parameter domain as polyhedral relation text.
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    /// Parameters in declaration order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn alias_groups(&self) -> &[AliasGroup] {
        &self.alias_groups
    }

    pub fn entities(&self) -> &[MemoryEntity] {
        &self.entities
    }

    fn sorted_by_kind(&self, wanted: impl Fn(EntityKind) -> bool) -> Vec<&MemoryEntity> {
        let mut group: Vec<&MemoryEntity> =
            self.entities.iter().filter(|e| wanted(e.kind)).collect();
        group.sort_by(|a, b| a.name.cmp(&b.name));
        group
    }

    /// Array entities, name-sorted. Argument-passing order depends on this.
    pub fn arrays(&self) -> Vec<&MemoryEntity> {
        self.sorted_by_kind(|k| k == EntityKind::Array)
    }

    /// Scalar entities, name-sorted. Argument-passing order depends on this.
    pub fn scalars(&self) -> Vec<&MemoryEntity> {
        self.sorted_by_kind(|k| k == EntityKind::Scalar)
    }

    /// Join-value entities (in-region and post-region), name-sorted.
    pub fn join_values(&self) -> Vec<&MemoryEntity> {
        self.sorted_by_kind(|k| matches!(k, EntityKind::Phi | EntityKind::ExitPhi))
    }

    /// Full textual dump of the region's instructions, in block order.
    pub fn region_instructions(&self, module: &Module) -> String {
        let mut out = String::new();
        for &block in &self.region.blocks {
            let f = module.func(self.func);
            for &inst in &f.block(block).insts {
                out.push_str(&module.print_inst(self.func, inst));
                out.push('\n');
            }
        }
        out
    }
}

/// Assembles a [`Scop`] from host analysis results, validating region shape.
pub struct ScopBuilder {
    scop: Scop,
}

impl ScopBuilder {
    pub fn new(name: &str, func: FuncRef, region: Region) -> Self {
        Self {
            scop: Scop {
                name: name.to_string(),
                func,
                region,
                context: String::new(),
                schedule: String::new(),
                parameters: Vec::new(),
                entities: Vec::new(),
                statements: Vec::new(),
                alias_groups: Vec::new(),
            },
        }
    }

    pub fn context(mut self, context: &str) -> Self {
        self.scop.context = context.to_string();
        self
    }

    pub fn schedule(mut self, schedule: &str) -> Self {
        self.scop.schedule = schedule.to_string();
        self
    }

    pub fn parameter(mut self, name: &str, value: ParamValue, ty: Type) -> Self {
        self.scop.parameters.push(Parameter {
            name: name.to_string(),
            value,
            ty,
        });
        self
    }

    pub fn entity(mut self, entity: MemoryEntity) -> Self {
        self.scop.entities.push(entity);
        self
    }

    pub fn statement(mut self, statement: Statement) -> Self {
        self.scop.statements.push(statement);
        self
    }

    pub fn alias_group(mut self, group: AliasGroup) -> Self {
        self.scop.alias_groups.push(group);
        self
    }

    /// Validate the region shape against the module and produce the model.
    pub fn build(self, module: &Module) -> Result<Scop, ModelError> {
        self.scop.region.validate(module.func(self.scop.func))?;
        Ok(self.scop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;

    const LOOP: &str = r#"
source "kernel.c"
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
  ret
}
"#;

    fn loop_region(module: &Module) -> (FuncRef, Region) {
        let func = module.func_by_name("kernel").unwrap();
        let f = module.func(func);
        let block = |name: &str| f.block_by_name(name).unwrap();
        let region = Region {
            entering: block("entry"),
            exiting: block("header"),
            exit: block("exit"),
            blocks: vec![block("header"), block("body"), block("latch")],
        };
        (func, region)
    }

    #[test]
    fn test_region_shape_validates() {
        let module = parse_module(LOOP).unwrap();
        let (func, region) = loop_region(&module);
        assert!(ScopBuilder::new("scop", func, region).build(&module).is_ok());
    }

    #[test]
    fn test_exit_inside_region_is_rejected() {
        let module = parse_module(LOOP).unwrap();
        let (func, mut region) = loop_region(&module);
        region.blocks.push(region.exit);
        let err = ScopBuilder::new("scop", func, region)
            .build(&module)
            .unwrap_err();
        assert!(matches!(err, ModelError::ExitInsideRegion(_)));
    }

    #[test]
    fn test_entering_edge_is_required() {
        let module = parse_module(LOOP).unwrap();
        let (func, mut region) = loop_region(&module);
        // Region entry swapped away from the block the entering edge targets.
        region.blocks.swap(0, 1);
        let err = ScopBuilder::new("scop", func, region)
            .build(&module)
            .unwrap_err();
        assert!(matches!(err, ModelError::NoEnteringEdge(_)));
    }

    #[test]
    fn test_sorted_views_partition_and_order() {
        let module = parse_module(LOOP).unwrap();
        let (func, region) = loop_region(&module);
        let base = module.func(func).args()[1];
        let scop = ScopBuilder::new("scop", func, region)
            .entity(MemoryEntity::scalar("zeta", Type::Double, base))
            .entity(MemoryEntity::array("B", Type::Double, vec![], base))
            .entity(MemoryEntity::array("A", Type::Double, vec![], base))
            .entity(MemoryEntity::phi("mid", Type::Int(64), base))
            .entity(MemoryEntity::exit_phi("end", Type::Int(64), base))
            .build(&module)
            .unwrap();

        let names = |v: Vec<&MemoryEntity>| {
            v.into_iter().map(|e| e.name.clone()).collect::<Vec<_>>()
        };
        assert_eq!(names(scop.arrays()), vec!["A", "B"]);
        assert_eq!(names(scop.scalars()), vec!["zeta"]);
        assert_eq!(names(scop.join_values()), vec!["end", "mid"]);
    }

    #[test]
    fn test_dependence_query_is_level_keyed() {
        let mut info = MapDependenceInfo::new();
        info.insert(
            "scop",
            AnalysisLevel::Statement,
            Dependences {
                raw: "{ S[i] -> S[i+1] }".to_string(),
                ..Default::default()
            },
        );
        assert!(info.get("scop", AnalysisLevel::Statement).is_some());
        assert!(info.get("scop", AnalysisLevel::Reference).is_none());
        assert!(info.get("other", AnalysisLevel::Statement).is_none());
    }

    #[test]
    fn test_region_instruction_dump_is_block_ordered() {
        let module = parse_module(LOOP).unwrap();
        let (func, region) = loop_region(&module);
        let scop = ScopBuilder::new("scop", func, region).build(&module).unwrap();
        let dump = scop.region_instructions(&module);
        let phi_at = dump.find("phi i64").unwrap();
        let load_at = dump.find("load double").unwrap();
        let inc_at = dump.find("add i64").unwrap();
        assert!(phi_at < load_at && load_at < inc_at);
    }
}
