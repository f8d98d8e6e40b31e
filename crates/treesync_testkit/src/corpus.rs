//! The bundled scenario corpus.
//!
//! Scripts live as JSON under `corpus/` and are embedded at compile time, so
//! crates depending on the testkit can run them without touching the
//! filesystem. The CLI replays the same files from disk.

use crate::script::Script;

/// Raw JSON of every bundled scenario, as `(file stem, contents)` pairs.
pub const RAW_SCENARIOS: &[(&str, &str)] = &[
    (
        "basic_value_events",
        include_str!("../corpus/basic_value_events.json"),
    ),
    (
        "write_ack_revert",
        include_str!("../corpus/write_ack_revert.json"),
    ),
    ("limit_window", include_str!("../corpus/limit_window.json")),
    ("child_cascade", include_str!("../corpus/child_cascade.json")),
    ("merge_updates", include_str!("../corpus/merge_updates.json")),
];

/// Every bundled scenario, parsed.
///
/// # Panics
///
/// Panics if a bundled file is not a valid script.
#[must_use]
pub fn all_scenarios() -> Vec<Script> {
    RAW_SCENARIOS
        .iter()
        .map(|(_, raw)| Script::parse(raw))
        .collect()
}

/// One bundled scenario by file stem.
///
/// # Panics
///
/// Panics if no bundled scenario has that name.
#[must_use]
pub fn scenario(name: &str) -> Script {
    RAW_SCENARIOS
        .iter()
        .find(|(stem, _)| *stem == name)
        .map(|(_, raw)| Script::parse(raw))
        .unwrap_or_else(|| panic!("no bundled scenario named {name:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_scenarios_parse() {
        let scripts = all_scenarios();
        assert_eq!(scripts.len(), RAW_SCENARIOS.len());
        for script in &scripts {
            assert!(!script.steps.is_empty(), "{} has no steps", script.name);
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(scenario("limit_window").name, "limit_window");
    }
}
