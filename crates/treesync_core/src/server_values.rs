//! Resolution of deferred server values.
//!
//! A write may contain the placeholder `{".sv": "timestamp"}`, which the
//! server replaces with its own clock. When a pending write is applied to the
//! local cache the placeholder is resolved against an estimate of the server
//! clock so local views see a plausible value.

use std::time::{SystemTime, UNIX_EPOCH};

use treesync_codec::Value;

use crate::writes::CompoundWrite;

/// Reserved map key marking a deferred server value.
pub const SERVER_VALUE_KEY: &str = ".sv";

const TIMESTAMP: &str = "timestamp";

/// The substitution table for deferred values, based on the local clock
/// shifted by the server-reported offset.
#[must_use]
pub fn generate_server_values(clock_skew_ms: i64) -> Value {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    server_values_at(now_ms + clock_skew_ms)
}

/// The substitution table for a fixed instant.
#[must_use]
pub fn server_values_at(now_ms: i64) -> Value {
    Value::map_from([(TIMESTAMP, Value::Int(now_ms))])
}

fn resolve_placeholder(value: &Value, server_values: &Value) -> Option<Value> {
    let name = value.child(SERVER_VALUE_KEY)?.as_str()?;
    Some(get_named(server_values, name))
}

fn get_named(server_values: &Value, name: &str) -> Value {
    server_values.child(name).cloned().unwrap_or(Value::Null)
}

/// Replace every `{".sv": ...}` placeholder in `value`, including ones used
/// as priorities.
#[must_use]
pub fn resolve_deferred_value(value: &Value, server_values: &Value) -> Value {
    if let Some(resolved) = resolve_placeholder(value, server_values) {
        return resolved;
    }
    match value {
        Value::Map(m) => Value::Map(
            m.iter()
                .map(|(k, v)| (k.clone(), resolve_deferred_value(v, server_values)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve placeholders in every write of a merge.
#[must_use]
pub fn resolve_deferred_merge(merge: &CompoundWrite, server_values: &Value) -> CompoundWrite {
    let mut resolved = CompoundWrite::empty();
    for (path, value) in merge.entries() {
        resolved.add_write(&path, resolve_deferred_value(&value, server_values));
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_codec::Path;

    fn timestamp_placeholder() -> Value {
        Value::map_from([(SERVER_VALUE_KEY, Value::Str(TIMESTAMP.into()))])
    }

    #[test]
    fn resolves_top_level_placeholder() {
        let sv = server_values_at(1234);
        assert_eq!(
            resolve_deferred_value(&timestamp_placeholder(), &sv),
            Value::Int(1234)
        );
    }

    #[test]
    fn resolves_nested_placeholders() {
        let sv = server_values_at(99);
        let value = Value::map_from([
            ("a", timestamp_placeholder()),
            ("b", Value::Int(7)),
        ]);
        let resolved = resolve_deferred_value(&value, &sv);
        assert_eq!(resolved.child("a"), Some(&Value::Int(99)));
        assert_eq!(resolved.child("b"), Some(&Value::Int(7)));
    }

    #[test]
    fn plain_values_pass_through() {
        let sv = server_values_at(1);
        let value = Value::Str("hello".into());
        assert_eq!(resolve_deferred_value(&value, &sv), value);
    }

    #[test]
    fn merges_resolve_each_write() {
        let sv = server_values_at(55);
        let mut merge = CompoundWrite::empty();
        merge.add_write(&Path::parse("x"), timestamp_placeholder());
        merge.add_write(&Path::parse("y"), Value::Int(1));
        let resolved = resolve_deferred_merge(&merge, &sv);
        assert_eq!(
            resolved.get_complete_value(&Path::parse("x")),
            Some(Value::Int(55))
        );
        assert_eq!(
            resolved.get_complete_value(&Path::parse("y")),
            Some(Value::Int(1))
        );
    }

    #[test]
    fn generated_values_track_skew() {
        let sv = generate_server_values(0);
        let ts = sv.child(TIMESTAMP).and_then(Value::as_i64).unwrap();
        assert!(ts > 1_600_000_000_000);
    }
}
