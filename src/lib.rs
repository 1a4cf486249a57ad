//! Trellis - Polyhedral Region Offload Pipeline.
//!
//! Trellis replaces maximal affine regions of a host module with calls into
//! externally generated compute units. For each region it exports the
//! polyhedral model (iteration domains, memory accesses, dependences,
//! parameters) as a portable JSON payload, hands the payload to an external
//! code generator, and on success splices the control-flow graph so the
//! original computation is replaced by the generated unit's init/program/exit
//! entry points.
//!
//! # Primary Usage
//!
//! ```ignore
//! use trellis::{CommandGenerator, Pipeline, PipelineConfig};
//!
//! let generator = CommandGenerator::default();
//! let mut pipeline = Pipeline::new(PipelineConfig::default(), &generator);
//!
//! // One call per detected region; rejection leaves the module untouched.
//! let outcome = pipeline.process(&mut module, &scop, &deps);
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Host IR substrate: module, functions, blocks, phi nodes
//! - [`scop`] - Region model read from the host analysis results
//! - [`export`] - Wire-format serialization of the region model
//! - [`generate`] - External generator invocation and unit naming
//! - [`splice`] - Transactional control-flow rewrite
//! - [`pipeline`] - Per-region driver and eligibility gate

pub mod export;
pub mod generate;
pub mod ir;
pub mod pipeline;
pub mod scop;
pub mod splice;

// Re-export common types.
pub use export::{export, ExportError};
pub use generate::{
    CommandGenerator, GenerateRequest, Generator, GeneratorError, GeneratorOptions, UnitName,
    DEFAULT_GENERATOR,
};
pub use pipeline::{
    is_eligible, Ineligibility, Pipeline, PipelineConfig, RegionOutcome, RegionState, RejectReason,
};
pub use scop::{
    Access, AccessKind, AccessRange, AliasGroup, AnalysisLevel, DependenceInfo, Dependences,
    DimSize, EntityKind, MapDependenceInfo, MemoryEntity, ModelError, ParamValue, Parameter,
    Region, Scop, ScopBuilder, Statement,
};
pub use splice::{SpliceError, SplicePlan};
