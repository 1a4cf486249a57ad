//! Region offload pipeline demo binary.
//!
//! Builds a sample module with one counted loop, models the loop as a region
//! and drives the full export/generate/splice sequence over it. By default
//! the external generator is spawned; `--dry-run` substitutes an in-process
//! generator that prints the payload and succeeds, which makes the splice
//! observable without any external tooling installed.

use clap::Parser;
use std::time::Duration;
use trellis::ir::parser::parse_module;
use trellis::ir::Type;
use trellis::{
    Access, AnalysisLevel, CommandGenerator, Dependences, DimSize, GenerateRequest, Generator,
    GeneratorError, GeneratorOptions, MapDependenceInfo, MemoryEntity, ParamValue, Pipeline,
    PipelineConfig, Region, RegionOutcome, ScopBuilder, Statement, UnitName, DEFAULT_GENERATOR,
};

const SAMPLE: &str = r#"
source "sample.c"
func @stencil(i64 %n, ptr %A, ptr %B) -> void {
entry:
  br ^header
header:
  %i = phi i64 [^entry, 0], [^latch, %inc]
  %cmp = icmp_slt i1 %i, %n
  condbr %cmp, ^body, ^exit
body:
  %v = load double %A
  %w = fmul double %v, 2.0
  store %w, %B
  br ^latch
latch:
  %inc = add i64 %i, 1
  br ^header
exit:
  ret
}
"#;

#[derive(Parser)]
#[command(about = "Drive the region offload pipeline over a sample module")]
struct Args {
    /// External generator executable.
    #[arg(long, default_value = DEFAULT_GENERATOR)]
    generator: String,

    /// Use an in-process generator that accepts every region.
    #[arg(long)]
    dry_run: bool,

    /// Disable tuning of transfers between generated entry points.
    #[arg(long)]
    no_transfer_tune: bool,

    /// Kill the generator after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

/// Accepts every region and echoes the payload instead of generating code.
struct EchoGenerator;

impl Generator for EchoGenerator {
    fn invoke(&self, request: &GenerateRequest<'_>) -> Result<UnitName, GeneratorError> {
        println!("payload for region {}:\n{}\n", request.region, request.payload);
        Ok(UnitName::derive(request.source_path, request.region))
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut module = match parse_module(SAMPLE) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("sample module failed to parse: {err}");
            std::process::exit(1);
        }
    };

    let func = module.func_by_name("stencil").expect("sample function");
    let f = module.func(func);
    let block = |name: &str| f.block_by_name(name).expect("sample block");
    let region = Region {
        entering: block("entry"),
        exiting: block("header"),
        exit: block("exit"),
        blocks: vec![block("header"), block("body"), block("latch")],
    };
    let (n, a, b) = (f.args()[0], f.args()[1], f.args()[2]);
    let scop = ScopBuilder::new("%Scop0", func, region)
        .context("[n] -> { : n > 0 }")
        .schedule("{ S0[i] -> [i] }")
        .parameter("n", ParamValue::Symbol(n), Type::Int(64))
        .entity(MemoryEntity::array(
            "A",
            Type::Double,
            vec![DimSize::Sized("%n".to_string())],
            a,
        ))
        .entity(MemoryEntity::array(
            "B",
            Type::Double,
            vec![DimSize::Sized("%n".to_string())],
            b,
        ))
        .statement({
            let mut stmt = Statement::new("S0", "[n] -> { S0[i] : 0 <= i < n }");
            stmt.loops = vec![Some("%i = phi i64 [^entry, 0], [^latch, %inc]".to_string())];
            stmt.accesses
                .push(Access::read("{ S0[i] -> A[i] }", "%v = load double %A"));
            stmt.accesses.push(Access::write(
                "{ S0[i] -> B[i] }",
                "store %w, %B",
                Some("%w = fmul double %v, 2.0"),
            ));
            stmt
        })
        .build(&module)
        .expect("sample region shape");

    let mut deps = MapDependenceInfo::new();
    deps.insert("%Scop0", AnalysisLevel::Statement, Dependences::default());

    let config = PipelineConfig {
        generator_options: GeneratorOptions {
            transfer_tune: !args.no_transfer_tune,
            timeout: args.timeout_secs.map(Duration::from_secs),
        },
    };

    println!("before:\n{}", module.print());

    let command_generator;
    let echo_generator;
    let generator: &dyn Generator = if args.dry_run {
        echo_generator = EchoGenerator;
        &echo_generator
    } else {
        command_generator = CommandGenerator::new(&args.generator);
        &command_generator
    };

    let mut pipeline = Pipeline::new(config, generator);
    match pipeline.process(&mut module, &scop, &deps) {
        RegionOutcome::Transformed(unit) => {
            println!("region %Scop0 replaced by unit {unit}");
            println!("after:\n{}", module.print());
        }
        RegionOutcome::Untouched(reason) => {
            eprintln!("region %Scop0 left untouched: {reason}");
            std::process::exit(1);
        }
    }
}
