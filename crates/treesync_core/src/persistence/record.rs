//! The durable byte format for persisted records.
//!
//! User writes are converted to a plain [`Value`] tree before CBOR so the
//! stored shape is explicit and stable; tracked queries serialize directly.

use treesync_codec::{from_cbor, to_cbor, Path, Value};

use crate::error::{CoreError, CoreResult};
use crate::persistence::tracked::TrackedQuery;
use crate::types::WriteId;
use crate::writes::{CompoundWrite, UserWriteRecord, WritePayload};

const KEY_ID: &str = "id";
const KEY_PATH: &str = "path";
const KEY_VISIBLE: &str = "visible";
const KEY_OVERWRITE: &str = "overwrite";
const KEY_MERGE: &str = "merge";

/// Encode a pending user write.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if CBOR serialization fails.
pub fn encode_user_write(record: &UserWriteRecord) -> CoreResult<Vec<u8>> {
    let mut fields = Value::empty_map();
    if let Some(map) = fields.as_map_mut() {
        map.insert(KEY_ID.into(), Value::Int(record.write_id.get()));
        map.insert(KEY_PATH.into(), Value::Str(record.path.to_string()));
        map.insert(KEY_VISIBLE.into(), Value::Bool(record.visible));
        match &record.payload {
            WritePayload::Overwrite(value) => {
                map.insert(KEY_OVERWRITE.into(), value.clone());
            }
            WritePayload::Merge(children) => {
                let mut merge = Value::empty_map();
                if let Some(entries) = merge.as_map_mut() {
                    for (path, value) in children.entries() {
                        entries.insert(path.to_string(), value);
                    }
                }
                map.insert(KEY_MERGE.into(), merge);
            }
        }
    }
    Ok(to_cbor(&fields)?)
}

/// Decode a pending user write.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] on malformed bytes or a malformed record
/// shape.
pub fn decode_user_write(bytes: &[u8]) -> CoreResult<UserWriteRecord> {
    let fields: Value = from_cbor(bytes)?;
    let write_id = fields
        .child(KEY_ID)
        .and_then(Value::as_i64)
        .map(WriteId::new)
        .ok_or_else(|| malformed("user write missing id"))?;
    let path = fields
        .child(KEY_PATH)
        .and_then(Value::as_str)
        .map(Path::parse)
        .ok_or_else(|| malformed("user write missing path"))?;
    let visible = fields
        .child(KEY_VISIBLE)
        .and_then(Value::as_bool)
        .ok_or_else(|| malformed("user write missing visibility"))?;
    let payload = if let Some(value) = fields.child(KEY_OVERWRITE) {
        WritePayload::Overwrite(value.clone())
    } else if let Some(merge) = fields.child(KEY_MERGE) {
        let entries = merge
            .as_map()
            .ok_or_else(|| malformed("merge payload is not a map"))?;
        WritePayload::Merge(CompoundWrite::from_path_merge(
            entries
                .iter()
                .map(|(path, value)| (Path::parse(path), value.clone())),
        ))
    } else {
        return Err(malformed("user write has no payload"));
    };
    Ok(UserWriteRecord {
        write_id,
        path,
        payload,
        visible,
    })
}

/// Encode a tracked query.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if CBOR serialization fails.
pub fn encode_tracked_query(query: &TrackedQuery) -> CoreResult<Vec<u8>> {
    Ok(to_cbor(query)?)
}

/// Decode a tracked query.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] on malformed bytes.
pub fn decode_tracked_query(bytes: &[u8]) -> CoreResult<TrackedQuery> {
    Ok(from_cbor(bytes)?)
}

fn malformed(message: &str) -> CoreError {
    CoreError::Codec(treesync_codec::CodecError::invalid_structure(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryParams, QuerySpec};
    use crate::types::QueryId;

    #[test]
    fn overwrite_record_round_trips() {
        let record = UserWriteRecord {
            write_id: WriteId::new(7),
            path: Path::parse("users/alice"),
            payload: WritePayload::Overwrite(Value::map_from([
                ("name", Value::Str("alice".into())),
                ("score", Value::Int(10)),
            ])),
            visible: true,
        };
        let bytes = encode_user_write(&record).unwrap();
        assert_eq!(decode_user_write(&bytes).unwrap(), record);
    }

    #[test]
    fn merge_record_round_trips() {
        let record = UserWriteRecord {
            write_id: WriteId::new(8),
            path: Path::parse("users"),
            payload: WritePayload::Merge(CompoundWrite::from_path_merge([
                (Path::parse("alice/score"), Value::Int(1)),
                (Path::parse("bob"), Value::Str("new".into())),
            ])),
            visible: false,
        };
        let bytes = encode_user_write(&record).unwrap();
        assert_eq!(decode_user_write(&bytes).unwrap(), record);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let record = UserWriteRecord {
            write_id: WriteId::new(1),
            path: Path::root(),
            payload: WritePayload::Overwrite(Value::Int(1)),
            visible: true,
        };
        let bytes = encode_user_write(&record).unwrap();
        assert!(decode_user_write(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn tracked_query_round_trips() {
        let query = TrackedQuery {
            id: QueryId::new(3),
            spec: QuerySpec::new(
                Path::parse("scores"),
                QueryParams::default().order_by_value().limit_to_last(5),
            ),
            last_use: 12345,
            complete: true,
            active: false,
        };
        let bytes = encode_tracked_query(&query).unwrap();
        assert_eq!(decode_tracked_query(&bytes).unwrap(), query);
    }
}
