//! JSON view of [`DdcObject`]s.
//!
//! Used for the JSON debug response format and for accepting JSON request
//! bodies. Plain JSON maps onto plain fields. Values that JSON cannot express
//! directly use single-key marker objects:
//!
//! | Marker                 | Field value                         |
//! |------------------------|-------------------------------------|
//! | `{"$blob": "<hex>"}`   | [`FieldValue::BinaryAttachment`]    |
//! | `{"$object": "<hex>"}` | [`FieldValue::ObjectAttachment`]    |
//! | `{"$content": "<hex>"}`| [`FieldValue::ContentIdAttachment`] |
//! | `{"$bytes": "<hex>"}`  | [`FieldValue::Bytes`]               |

use serde_json::{Map, Number, Value};

use ddc_types::{BlobId, ContentId};

use crate::error::{ObjectError, ObjectResult};
use crate::object::{DdcObject, Field, FieldValue, MAX_NESTING};

const BLOB_MARKER: &str = "$blob";
const OBJECT_MARKER: &str = "$object";
const CONTENT_MARKER: &str = "$content";
const BYTES_MARKER: &str = "$bytes";

impl DdcObject {
    /// Render as a JSON object.
    pub fn to_json(&self) -> Value {
        fields_to_json(self.fields())
    }

    /// Parse from a JSON object.
    pub fn from_json(value: &Value) -> ObjectResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::new(fields_from_json(map, 0)?)),
            other => Err(ObjectError::InvalidJson(format!(
                "top level must be an object, got {}",
                type_name(other)
            ))),
        }
    }
}

fn fields_to_json(fields: &[Field]) -> Value {
    let map = fields
        .iter()
        .map(|f| (f.name.clone(), value_to_json(&f.value)))
        .collect::<Map<_, _>>();
    Value::Object(map)
}

fn marker(key: &str, hex: String) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), Value::String(hex));
    Value::Object(map)
}

fn value_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Integer(i) => Value::Number((*i).into()),
        FieldValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        FieldValue::String(s) => Value::String(s.clone()),
        FieldValue::Bytes(b) => marker(BYTES_MARKER, hex::encode(b)),
        FieldValue::Array(items) => Value::Array(items.iter().map(value_to_json).collect()),
        FieldValue::Object(fields) => fields_to_json(fields),
        FieldValue::BinaryAttachment(id) => marker(BLOB_MARKER, id.to_hex()),
        FieldValue::ObjectAttachment(id) => marker(OBJECT_MARKER, id.to_hex()),
        FieldValue::ContentIdAttachment(id) => marker(CONTENT_MARKER, id.to_hex()),
    }
}

fn fields_from_json(map: &Map<String, Value>, depth: usize) -> ObjectResult<Vec<Field>> {
    map.iter()
        .map(|(name, v)| Ok(Field::new(name.clone(), value_from_json(v, depth)?)))
        .collect()
}

fn value_from_json(value: &Value, depth: usize) -> ObjectResult<FieldValue> {
    let nests = match value {
        Value::Array(_) => true,
        Value::Object(map) => single_marker(map).is_none(),
        _ => false,
    };
    if nests && depth >= MAX_NESTING {
        return Err(ObjectError::TooDeep(MAX_NESTING));
    }
    Ok(match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => FieldValue::String(s.clone()),
        Value::Array(items) => FieldValue::Array(
            items
                .iter()
                .map(|v| value_from_json(v, depth + 1))
                .collect::<ObjectResult<Vec<_>>>()?,
        ),
        Value::Object(map) => match single_marker(map) {
            Some((key, hex)) => marker_value(key, hex)?,
            None => FieldValue::Object(fields_from_json(map, depth + 1)?),
        },
    })
}

fn single_marker(map: &Map<String, Value>) -> Option<(&str, &str)> {
    if map.len() != 1 {
        return None;
    }
    let (key, value) = map.iter().next()?;
    match (key.as_str(), value) {
        (k @ (BLOB_MARKER | OBJECT_MARKER | CONTENT_MARKER | BYTES_MARKER), Value::String(s)) => {
            Some((k, s.as_str()))
        }
        _ => None,
    }
}

fn marker_value(key: &str, hex_str: &str) -> ObjectResult<FieldValue> {
    let bad = |e: ddc_types::TypeError| ObjectError::InvalidJson(format!("{key}: {e}"));
    Ok(match key {
        BLOB_MARKER => FieldValue::BinaryAttachment(BlobId::from_hex(hex_str).map_err(bad)?),
        OBJECT_MARKER => FieldValue::ObjectAttachment(BlobId::from_hex(hex_str).map_err(bad)?),
        CONTENT_MARKER => FieldValue::ContentIdAttachment(ContentId::from_hex(hex_str).map_err(bad)?),
        _ => FieldValue::Bytes(
            hex::decode(hex_str).map_err(|e| ObjectError::InvalidJson(format!("{key}: {e}")))?,
        ),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Attachment;
    use serde_json::json;

    #[test]
    fn plain_json_maps_to_plain_fields() {
        let obj = DdcObject::from_json(&json!({
            "name": "asset",
            "count": 3,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "meta": {"owner": "build"},
            "none": null,
        }))
        .unwrap();
        assert_eq!(obj.get("count"), Some(&FieldValue::Integer(3)));
        assert_eq!(obj.get("ratio"), Some(&FieldValue::Float(0.5)));
        assert!(matches!(obj.get("meta"), Some(FieldValue::Object(_))));
        assert!(obj.attachments().is_empty());
    }

    #[test]
    fn markers_become_attachments() {
        let blob = BlobId::from_bytes(b"b");
        let object = BlobId::from_bytes(b"o");
        let content = ContentId::from_bytes(b"c");
        let obj = DdcObject::from_json(&json!({
            "blob": {"$blob": blob.to_hex()},
            "child": {"$object": object.to_hex()},
            "content": {"$content": content.to_hex()},
        }))
        .unwrap();
        let attachments = obj.attachments();
        assert_eq!(attachments.len(), 3);
        assert!(attachments.contains(&Attachment::Binary(blob)));
        assert!(attachments.contains(&Attachment::Object(object)));
        assert!(attachments.contains(&Attachment::Content(content)));
    }

    #[test]
    fn to_json_renders_markers() {
        let id = BlobId::from_bytes(b"x");
        let obj = DdcObject::builder()
            .binary_attachment("data", id)
            .bytes("raw", vec![0xde, 0xad])
            .build();
        let value = obj.to_json();
        assert_eq!(value["data"]["$blob"], json!(id.to_hex()));
        assert_eq!(value["raw"]["$bytes"], json!("dead"));
    }

    #[test]
    fn json_view_is_stable_through_conversion() {
        let original = json!({
            "a": 1,
            "b": {"$blob": BlobId::from_bytes(b"1").to_hex()},
            "c": [true, {"$bytes": "00ff"}],
        });
        let obj = DdcObject::from_json(&original).unwrap();
        assert_eq!(obj.to_json(), original);
    }

    #[test]
    fn rejects_non_object_top_level() {
        let err = DdcObject::from_json(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, ObjectError::InvalidJson(_)));
    }

    #[test]
    fn rejects_bad_attachment_hash() {
        let err = DdcObject::from_json(&json!({"x": {"$blob": "not-hex"}})).unwrap_err();
        assert!(matches!(err, ObjectError::InvalidJson(_)));
    }

    #[test]
    fn rejects_nesting_past_limit() {
        let mut deep = json!(1);
        for _ in 0..=MAX_NESTING {
            deep = json!([deep]);
        }
        let err = DdcObject::from_json(&json!({ "x": deep })).unwrap_err();
        assert!(matches!(err, ObjectError::TooDeep(MAX_NESTING)));
    }

    #[test]
    fn marker_with_extra_keys_is_plain_object() {
        let obj = DdcObject::from_json(&json!({
            "x": {"$blob": "00", "other": 1}
        }))
        .unwrap();
        assert!(matches!(obj.get("x"), Some(FieldValue::Object(_))));
    }
}
