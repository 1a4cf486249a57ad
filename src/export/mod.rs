// This module serializes a region model into the portable JSON payload consumed by the
// external code generator. The payload carries the region name, the parameter list, the
// memory entities in three disjoint name-sorted groups (arrays, scalars, join values),
// a full textual dump of the region's instructions, the parameter context and schedule
// as polyhedral relation text, the five dependence relations, the statements with their
// ordered accesses, and the conservative alias groups. Serialization goes through serde
// structs whose field order fixes the key order, so two exports of the same model are
// byte-identical; the generator memoizes by payload content in typical deployments.
// Entity serialization follows the closed EntityKind sum: one function per kind tag,
// dispatched by a single match.

//! Wire-format export of the region model.
//!
//! [`export`] fails with [`ExportError::MalformedParameter`] when a
//! parameter's defining value is neither a free symbol nor an affine
//! induction recurrence. This mirrors the eligibility gate's integral check
//! but validates the value's shape rather than its type, so the exporter
//! stays safe even if it is driven without the gate.

use crate::ir::Module;
use crate::scop::{Access, AccessKind, Dependences, DimSize, EntityKind, MemoryEntity, Scop};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while serializing a region model.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("parameter '{name}' has an unclassifiable defining value")]
    MalformedParameter { name: String },
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Payload<'a> {
    name: &'a str,
    parameters: Vec<ParameterPayload>,
    arrays: Vec<EntityPayload>,
    instructions: String,
    context: &'a str,
    schedule: &'a str,
    dependencies: DependencesPayload<'a>,
    statements: Vec<StatementPayload<'a>>,
    access_range: Vec<AliasGroupPayload<'a>>,
}

#[derive(Serialize)]
struct ParameterPayload {
    name: String,
    variable: String,
    #[serde(rename = "type")]
    ty: String,
}

#[derive(Serialize)]
struct EntityPayload {
    name: String,
    kind: &'static str,
    #[serde(rename = "type")]
    ty: String,
    sizes: Vec<String>,
    variable: String,
}

#[derive(Serialize)]
struct DependencesPayload<'a> {
    #[serde(rename = "RAW")]
    raw: &'a str,
    #[serde(rename = "WAR")]
    war: &'a str,
    #[serde(rename = "WAW")]
    waw: &'a str,
    #[serde(rename = "RED")]
    red: &'a str,
    #[serde(rename = "TC_RED")]
    tc_red: &'a str,
}

#[derive(Serialize)]
struct StatementPayload<'a> {
    name: &'a str,
    domain: &'a str,
    affine: bool,
    loops: Vec<LoopPayload<'a>>,
    accesses: Vec<AccessPayload<'a>>,
}

#[derive(Serialize)]
struct LoopPayload<'a> {
    induction_variable: &'a str,
}

#[derive(Serialize)]
struct AccessPayload<'a> {
    kind: &'static str,
    relation: &'a str,
    access_instruction: &'a str,
    incoming_value: &'a str,
}

#[derive(Serialize)]
struct AliasGroupPayload<'a> {
    readwrite: Vec<RangePayload<'a>>,
    readonly: Vec<RangePayload<'a>>,
}

#[derive(Serialize)]
struct RangePayload<'a> {
    minimal: &'a str,
    maximal: &'a str,
}

/// Serialize the region model into the generator's wire format.
pub fn export(scop: &Scop, deps: &Dependences, module: &Module) -> Result<String, ExportError> {
    let mut parameters = Vec::new();
    for param in scop.parameters() {
        let value = param
            .value
            .resolved()
            .ok_or_else(|| ExportError::MalformedParameter {
                name: param.name.clone(),
            })?;
        parameters.push(ParameterPayload {
            name: param.name.clone(),
            variable: module.print_value(scop.func(), value),
            ty: param.ty.to_string(),
        });
    }

    // Group order is fixed: arrays, then scalars, then join values, each
    // name-sorted. The splicer builds call arguments from the same views.
    let mut arrays = Vec::new();
    for entity in scop.arrays() {
        arrays.push(entity_payload(entity, scop, module));
    }
    for entity in scop.scalars() {
        arrays.push(entity_payload(entity, scop, module));
    }
    for entity in scop.join_values() {
        arrays.push(entity_payload(entity, scop, module));
    }

    let statements = scop
        .statements()
        .iter()
        .map(|stmt| StatementPayload {
            name: &stmt.name,
            domain: &stmt.domain,
            affine: stmt.affine,
            loops: stmt
                .loops
                .iter()
                .flatten()
                .map(|indvar| LoopPayload {
                    induction_variable: indvar,
                })
                .collect(),
            accesses: stmt.accesses.iter().map(access_payload).collect(),
        })
        .collect();

    let access_range = scop
        .alias_groups()
        .iter()
        .map(|group| AliasGroupPayload {
            readwrite: group
                .readwrite
                .iter()
                .map(|r| RangePayload {
                    minimal: &r.minimal,
                    maximal: &r.maximal,
                })
                .collect(),
            readonly: group
                .readonly
                .iter()
                .map(|r| RangePayload {
                    minimal: &r.minimal,
                    maximal: &r.maximal,
                })
                .collect(),
        })
        .collect();

    let payload = Payload {
        name: scop.name(),
        parameters,
        arrays,
        instructions: scop.region_instructions(module),
        context: scop.context(),
        schedule: scop.schedule(),
        dependencies: DependencesPayload {
            raw: &deps.raw,
            war: &deps.war,
            waw: &deps.waw,
            red: &deps.red,
            tc_red: &deps.tc_red,
        },
        statements,
        access_range,
    };
    Ok(serde_json::to_string(&payload)?)
}

fn access_payload(access: &Access) -> AccessPayload<'_> {
    AccessPayload {
        kind: match access.kind {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
        },
        relation: &access.relation,
        access_instruction: &access.instruction,
        // Empty when the stored value is not compile-time determinable.
        incoming_value: access.stored_value.as_deref().unwrap_or(""),
    }
}

fn entity_payload(entity: &MemoryEntity, scop: &Scop, module: &Module) -> EntityPayload {
    match entity.kind {
        EntityKind::Array => serialize_array(entity, scop, module),
        EntityKind::Scalar => serialize_scalar(entity, scop, module),
        EntityKind::Phi | EntityKind::ExitPhi => serialize_join(entity, scop, module),
    }
}

fn serialize_array(entity: &MemoryEntity, scop: &Scop, module: &Module) -> EntityPayload {
    EntityPayload {
        name: entity.name.clone(),
        kind: "array",
        ty: entity.element_ty.to_string(),
        sizes: entity
            .sizes
            .iter()
            .map(|size| match size {
                DimSize::Sized(text) => text.clone(),
                DimSize::Unbounded => "*".to_string(),
            })
            .collect(),
        variable: module.print_value(scop.func(), entity.base),
    }
}

fn serialize_scalar(entity: &MemoryEntity, scop: &Scop, module: &Module) -> EntityPayload {
    EntityPayload {
        name: entity.name.clone(),
        kind: "value",
        ty: entity.element_ty.to_string(),
        sizes: Vec::new(),
        variable: module.print_value(scop.func(), entity.base),
    }
}

fn serialize_join(entity: &MemoryEntity, scop: &Scop, module: &Module) -> EntityPayload {
    EntityPayload {
        name: entity.name.clone(),
        kind: match entity.kind {
            EntityKind::ExitPhi => "exit_phi",
            _ => "phi",
        },
        ty: entity.element_ty.to_string(),
        sizes: Vec::new(),
        variable: module.print_value(scop.func(), entity.base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;
    use crate::ir::Type;
    use crate::scop::{AccessRange, AliasGroup, ParamValue, Region, ScopBuilder, Statement};
    use serde_json::Value;

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

    fn loop_scop(module: &Module, params: &[(&str, ParamValue)]) -> Scop {
        let func = module.func_by_name("kernel").unwrap();
        let f = module.func(func);
        let block = |name: &str| f.block_by_name(name).unwrap();
        let region = Region {
            entering: block("entry"),
            exiting: block("header"),
            exit: block("exit"),
            blocks: vec![block("header"), block("body"), block("latch")],
        };
        let base = f.args()[1];
        let mut builder = ScopBuilder::new("kernel_scop", func, region)
            .context("[n] -> { : n > 0 }")
            .schedule("{ S0[i] -> [i] }")
            .entity(MemoryEntity::array(
                "A",
                Type::Double,
                vec![DimSize::Sized("%n".to_string())],
                base,
            ))
            .statement({
                let mut stmt = Statement::new("S0", "[n] -> { S0[i] : 0 <= i < n }");
                stmt.loops = vec![Some("%i = phi i64 [^entry, 0], [^latch, %inc]".to_string())];
                stmt.accesses
                    .push(Access::read("{ S0[i] -> A[i] }", "%v = load double %A"));
                stmt
            });
        for (name, value) in params {
            builder = builder.parameter(name, *value, Type::Int(64));
        }
        builder.build(module).unwrap()
    }

    fn deps() -> Dependences {
        Dependences {
            raw: "{ }".to_string(),
            war: "{ }".to_string(),
            waw: "{ }".to_string(),
            red: "{ }".to_string(),
            tc_red: "{ }".to_string(),
        }
    }

    #[test]
    fn test_export_is_deterministic() {
        let module = parse_module(LOOP).unwrap();
        let n = module.func(module.func_by_name("kernel").unwrap()).args()[0];
        let scop = loop_scop(&module, &[("n", ParamValue::Symbol(n))]);
        let first = export(&scop, &deps(), &module).unwrap();
        let second = export(&scop, &deps(), &module).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_export_shape_matches_model() {
        let module = parse_module(LOOP).unwrap();
        let n = module.func(module.func_by_name("kernel").unwrap()).args()[0];
        let scop = loop_scop(&module, &[("n", ParamValue::Symbol(n))]);
        let payload: Value =
            serde_json::from_str(&export(&scop, &deps(), &module).unwrap()).unwrap();

        assert_eq!(payload["name"], "kernel_scop");
        assert_eq!(payload["parameters"].as_array().unwrap().len(), 1);
        assert_eq!(payload["parameters"][0]["variable"], "i64 %n");
        assert_eq!(payload["arrays"].as_array().unwrap().len(), 1);
        assert_eq!(payload["arrays"][0]["kind"], "array");
        assert_eq!(payload["arrays"][0]["sizes"][0], "%n");
        assert_eq!(payload["statements"].as_array().unwrap().len(), 1);
        let accesses = payload["statements"][0]["accesses"].as_array().unwrap();
        assert_eq!(accesses.len(), 1);
        assert_eq!(accesses[0]["kind"], "read");
        assert_eq!(accesses[0]["incoming_value"], "");
        assert_eq!(payload["dependencies"]["TC_RED"], "{ }");
        assert!(payload["instructions"]
            .as_str()
            .unwrap()
            .contains("load double"));
    }

    #[test]
    fn test_groups_never_interleave() {
        let module = parse_module(LOOP).unwrap();
        let func = module.func_by_name("kernel").unwrap();
        let base = module.func(func).args()[1];
        let f = module.func(func);
        let block = |name: &str| f.block_by_name(name).unwrap();
        let region = Region {
            entering: block("entry"),
            exiting: block("header"),
            exit: block("exit"),
            blocks: vec![block("header"), block("body"), block("latch")],
        };
        let scop = ScopBuilder::new("kernel_scop", func, region)
            .entity(MemoryEntity::phi("join_b", Type::Int(64), base))
            .entity(MemoryEntity::array("zz_last", Type::Double, vec![], base))
            .entity(MemoryEntity::scalar("beta", Type::Double, base))
            .entity(MemoryEntity::array("aa_first", Type::Double, vec![], base))
            .entity(MemoryEntity::exit_phi("join_a", Type::Int(64), base))
            .entity(MemoryEntity::scalar("alpha", Type::Double, base))
            .build(&module)
            .unwrap();

        let payload: Value =
            serde_json::from_str(&export(&scop, &deps(), &module).unwrap()).unwrap();
        let order: Vec<(&str, &str)> = payload["arrays"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| (e["name"].as_str().unwrap(), e["kind"].as_str().unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("aa_first", "array"),
                ("zz_last", "array"),
                ("alpha", "value"),
                ("beta", "value"),
                ("join_a", "exit_phi"),
                ("join_b", "phi"),
            ]
        );
    }

    #[test]
    fn test_alias_groups_serialize_range_pairs() {
        let module = parse_module(LOOP).unwrap();
        let func = module.func_by_name("kernel").unwrap();
        let f = module.func(func);
        let block = |name: &str| f.block_by_name(name).unwrap();
        let region = Region {
            entering: block("entry"),
            exiting: block("header"),
            exit: block("exit"),
            blocks: vec![block("header"), block("body"), block("latch")],
        };
        let scop = ScopBuilder::new("kernel_scop", func, region)
            .alias_group(AliasGroup {
                readwrite: vec![AccessRange {
                    minimal: "{ A[0] }".to_string(),
                    maximal: "{ A[n - 1] }".to_string(),
                }],
                readonly: vec![AccessRange {
                    minimal: "{ B[0] }".to_string(),
                    maximal: "{ B[n - 1] }".to_string(),
                }],
            })
            .build(&module)
            .unwrap();

        let payload: Value =
            serde_json::from_str(&export(&scop, &deps(), &module).unwrap()).unwrap();
        let group = &payload["access_range"][0];
        assert_eq!(group["readwrite"][0]["minimal"], "{ A[0] }");
        assert_eq!(group["readwrite"][0]["maximal"], "{ A[n - 1] }");
        assert_eq!(group["readonly"][0]["minimal"], "{ B[0] }");
        assert_eq!(group["readonly"][0]["maximal"], "{ B[n - 1] }");
    }

    #[test]
    fn test_malformed_parameter_is_refused() {
        let module = parse_module(LOOP).unwrap();
        let scop = loop_scop(&module, &[("n", ParamValue::Opaque)]);
        let err = export(&scop, &deps(), &module).unwrap_err();
        assert!(matches!(
            err,
            ExportError::MalformedParameter { ref name } if name == "n"
        ));
    }
}
