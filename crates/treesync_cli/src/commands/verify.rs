//! Verify command implementation.

use std::path::PathBuf;

use treesync_testkit::corpus::all_scenarios;

use super::{load_script, report, verify_script, CliError};

/// Runs the verify command over the given files, or the bundled corpus when
/// no files are named.
pub fn run(files: &[PathBuf], rebase: Option<&str>) -> Result<(), CliError> {
    let scripts = if files.is_empty() {
        all_scenarios()
    } else {
        files
            .iter()
            .map(|file| load_script(file))
            .collect::<Result<Vec<_>, _>>()?
    };

    let total = scripts.len();
    let mut failed = 0usize;
    for script in &scripts {
        let outcome = verify_script(script, rebase);
        if outcome.is_err() {
            failed += 1;
        }
        report(&script.name, &outcome);
    }
    if failed > 0 {
        return Err(CliError::ScenariosFailed { failed, total });
    }
    Ok(())
}
