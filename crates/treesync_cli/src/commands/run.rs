//! Run command implementation.

use std::path::Path as FilePath;

use treesync_testkit::script::{describe_event, ScriptRunner};

use super::{load_script, script_prefix, CliError};

/// Runs the run command: execute one scenario and print what each step raised.
pub fn run(file: &FilePath, rebase: Option<&str>) -> Result<(), CliError> {
    let script = load_script(file)?;
    tracing::debug!(file = %file.display(), steps = script.steps.len(), "running scenario");

    println!("{}", script.name);
    if !script.description.is_empty() {
        println!("  {}", script.description);
    }

    let raised = ScriptRunner::with_prefix(script_prefix(rebase)).execute_script(&script);
    for (index, events) in raised.iter().enumerate() {
        println!("step {index}:");
        if events.is_empty() {
            println!("  (no events)");
        }
        for event in events {
            println!("  {}", describe_event(event));
        }
    }
    Ok(())
}
