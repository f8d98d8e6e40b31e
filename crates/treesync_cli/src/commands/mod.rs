//! CLI command implementations.

pub mod run;
pub mod verify;

use std::panic::{self, AssertUnwindSafe};
use std::path::Path as FilePath;

use thiserror::Error;
use treesync_codec::Path;
use treesync_testkit::script::{Script, ScriptRunner};

/// Errors the CLI reports to the shell.
#[derive(Error, Debug)]
pub enum CliError {
    /// A scenario file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// The offending file.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A scenario file is not a valid script.
    #[error("invalid scenario {path}: {message}")]
    InvalidScript {
        /// The offending file.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// One or more scenarios raised the wrong events.
    #[error("{failed} of {total} scenarios failed")]
    ScenariosFailed {
        /// Failing scenario count.
        failed: usize,
        /// Total scenario count.
        total: usize,
    },
}

/// Read and parse one scenario file.
pub fn load_script(file: &FilePath) -> Result<Script, CliError> {
    let display = file.display().to_string();
    let raw = std::fs::read_to_string(file).map_err(|source| CliError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|e| CliError::InvalidScript {
        path: display,
        message: e.to_string(),
    })
}

/// Verify one script, catching expectation mismatches.
///
/// Returns `Ok` when every step raised exactly the events it declared.
pub fn verify_script(script: &Script, rebase: Option<&str>) -> Result<(), String> {
    let prefix = script_prefix(rebase);
    let script = script.clone();
    panic::catch_unwind(AssertUnwindSafe(move || {
        ScriptRunner::with_prefix(prefix).run(&script);
    }))
    .map_err(|payload| {
        payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| (*s).to_owned()))
            .unwrap_or_else(|| "scenario panicked".to_owned())
    })
}

/// The prefix a `--rebase` flag asks for.
pub fn script_prefix(rebase: Option<&str>) -> Path {
    rebase.map_or_else(Path::root, Path::parse)
}

/// Print one scenario verdict.
pub fn report(name: &str, outcome: &Result<(), String>) {
    match outcome {
        Ok(()) => println!("✓ {name}"),
        Err(message) => {
            println!("✗ {name}");
            println!("  {message}");
        }
    }
}
