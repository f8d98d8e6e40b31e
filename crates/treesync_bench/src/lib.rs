//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use treesync_codec::Value;

/// A map of `count` children keyed `k000..`, each holding an integer.
#[must_use]
pub fn keyed_children(count: usize) -> Value {
    Value::map_from((0..count).map(|i| (format!("k{i:04}"), Value::Int(i as i64))))
}

/// A map of `count` records shaped like user posts, each with a score the
/// ordering benchmarks sort by.
#[must_use]
pub fn scored_records(count: usize) -> Value {
    Value::map_from((0..count).map(|i| {
        (
            format!("rec{i:04}"),
            Value::map_from([
                ("title", Value::Str(format!("record {i}"))),
                // Spread scores so limit windows have churn headroom.
                ("score", Value::Int((i as i64) * 10)),
            ]),
        )
    }))
}
