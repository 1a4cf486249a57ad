// This module is the boundary to the external code generator. The Generator trait keeps
// the collaborator injectable so tests can substitute an in-process fake; the shipped
// implementation, CommandGenerator, invokes the external tool synchronously as a
// subprocess with the serialized payload passed as one opaque argument. The unit naming
// contract lives here too: the generated unit's name is derived deterministically from
// the source file name and the region name with a fixed sanitization rule, and the
// splicer relies on exactly this rule to reference the symbols the generator emits.
// Options are an explicit value threaded through the pipeline entry point, never
// process-wide state.

//! External generator invocation and the generated-unit naming contract.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised while invoking the external generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The command-execution facility is unavailable or the tool is missing.
    #[error("generator unavailable: {0}")]
    Unavailable(std::io::Error),
    /// The generator ran and reported failure.
    #[error("generator exited with {0}")]
    Failed(std::process::ExitStatus),
    /// The generator exceeded the configured time limit and was killed.
    #[error("generator timed out after {0:?}")]
    TimedOut(Duration),
    #[error("i/o error while waiting for generator: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for one generator invocation.
///
/// Threaded explicitly from the pipeline entry point so embeddings running
/// several pipeline instances cannot cross-contaminate.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Tune transfers between the generated entry points.
    pub transfer_tune: bool,
    /// Kill the generator after this long and treat the region as rejected.
    /// `None` blocks until the subprocess exits.
    pub timeout: Option<Duration>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            transfer_tune: true,
            timeout: None,
        }
    }
}

/// One generation request: the source file, the region and its payload.
#[derive(Debug)]
pub struct GenerateRequest<'a> {
    pub source_path: &'a Path,
    pub region: &'a str,
    pub payload: &'a str,
    pub options: &'a GeneratorOptions,
}

/// Name of a generated unit and of its three entry-point symbols.
///
/// Derived from `{source file name}_{region name}` by stripping `.` and `%`
/// and mapping `-` to `_`. The external generator applies the same rule when
/// it emits the unit, so both sides agree on the linker-visible symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitName(String);

impl UnitName {
    pub fn derive(source_path: &Path, region: &str) -> Self {
        let file = source_path
            .file_name()
            .map(|f| f.to_string_lossy())
            .unwrap_or_default();
        let mut name = String::with_capacity(file.len() + region.len() + 1);
        for c in format!("{file}_{region}").chars() {
            match c {
                '.' | '%' => {}
                '-' => name.push('_'),
                c => name.push(c),
            }
        }
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Symbol of the entry point that allocates the unit's handle.
    pub fn init_symbol(&self) -> String {
        format!("__init_{}", self.0)
    }

    /// Symbol of the entry point that runs the computation.
    pub fn program_symbol(&self) -> String {
        format!("__program_{}", self.0)
    }

    /// Symbol of the entry point that releases the handle.
    pub fn exit_symbol(&self) -> String {
        format!("__exit_{}", self.0)
    }
}

impl std::fmt::Display for UnitName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Injectable code-generator collaborator.
pub trait Generator {
    /// Run the generator over one exported region. Returns the name of the
    /// deposited unit on success; any error leaves the region untouched.
    fn invoke(&self, request: &GenerateRequest<'_>) -> Result<UnitName, GeneratorError>;
}

/// Invokes the external generator as a synchronous subprocess.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: PathBuf,
}

/// Default name of the external generator executable, resolved via `PATH`.
pub const DEFAULT_GENERATOR: &str = "scopgen";

impl CommandGenerator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CommandGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_GENERATOR)
    }
}

impl Generator for CommandGenerator {
    fn invoke(&self, request: &GenerateRequest<'_>) -> Result<UnitName, GeneratorError> {
        let mut command = Command::new(&self.program);
        command.arg(format!("--source_path={}", request.source_path.display()));
        // The payload travels as one opaque argument; no shell is involved,
        // so it needs no quoting.
        command.arg(format!("--scop={}", request.payload));
        if request.options.transfer_tune {
            command.arg("--transfer_tune");
        }

        log::debug!(
            "invoking generator '{}' for region {}",
            self.program.display(),
            request.region
        );
        let mut child = command.spawn().map_err(GeneratorError::Unavailable)?;
        let status = match request.options.timeout {
            None => child.wait()?,
            Some(limit) => {
                let started = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if started.elapsed() >= limit {
                        child.kill().ok();
                        child.wait().ok();
                        return Err(GeneratorError::TimedOut(limit));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        };
        if !status.success() {
            return Err(GeneratorError::Failed(status));
        }
        Ok(UnitName::derive(request.source_path, request.region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_name_sanitization() {
        let unit = UnitName::derive(Path::new("kernel.c"), "%Scop0");
        assert_eq!(unit.as_str(), "kernelc_Scop0");

        let unit = UnitName::derive(Path::new("my-kernel.cpp"), "%R-1");
        assert_eq!(unit.as_str(), "my_kernelcpp_R_1");
    }

    #[test]
    fn test_unit_name_uses_file_name_not_full_path() {
        let unit = UnitName::derive(Path::new("/tmp/build-dir/loop.c"), "%R");
        assert_eq!(unit.as_str(), "loopc_R");
    }

    #[test]
    fn test_entry_point_symbols() {
        let unit = UnitName::derive(Path::new("loop.c"), "%R");
        assert_eq!(unit.init_symbol(), "__init_loopc_R");
        assert_eq!(unit.program_symbol(), "__program_loopc_R");
        assert_eq!(unit.exit_symbol(), "__exit_loopc_R");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = UnitName::derive(Path::new("kernel.c"), "%Scop0");
        let b = UnitName::derive(Path::new("kernel.c"), "%Scop0");
        assert_eq!(a, b);
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;

        fn request<'a>(options: &'a GeneratorOptions, payload: &'a str) -> GenerateRequest<'a> {
            GenerateRequest {
                source_path: Path::new("kernel.c"),
                region: "%Scop0",
                payload,
                options,
            }
        }

        #[test]
        fn test_successful_invocation_names_the_unit() {
            let options = GeneratorOptions::default();
            let generator = CommandGenerator::new("true");
            let unit = generator.invoke(&request(&options, "{}")).unwrap();
            assert_eq!(unit.as_str(), "kernelc_Scop0");
        }

        #[test]
        fn test_nonzero_exit_is_failure() {
            let options = GeneratorOptions::default();
            let generator = CommandGenerator::new("false");
            let err = generator.invoke(&request(&options, "{}")).unwrap_err();
            assert!(matches!(err, GeneratorError::Failed(_)));
        }

        #[test]
        fn test_missing_tool_is_unavailable() {
            let options = GeneratorOptions::default();
            let generator = CommandGenerator::new("trellis-no-such-generator");
            let err = generator.invoke(&request(&options, "{}")).unwrap_err();
            assert!(matches!(err, GeneratorError::Unavailable(_)));
        }

        #[test]
        fn test_timeout_kills_the_generator() {
            use std::os::unix::fs::PermissionsExt;

            // A stand-in generator that ignores its arguments and hangs.
            let script = std::env::temp_dir().join(format!("trellis-hang-{}.sh", std::process::id()));
            std::fs::write(&script, "#!/bin/sh\nsleep 10\n").unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

            let options = GeneratorOptions {
                timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            };
            let generator = CommandGenerator::new(&script);
            let err = generator.invoke(&request(&options, "{}")).unwrap_err();
            std::fs::remove_file(&script).ok();
            assert!(matches!(err, GeneratorError::TimedOut(_)));
        }
    }
}
