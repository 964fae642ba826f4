//! String encoding of cache values for the remote store
//!
//! Values are written as JSON. Buffers and maps, which JSON cannot express,
//! are written as tagged objects and revived on read:
//!
//! - buffer: `{"type":"Buffer","data":[104,105]}`
//! - map: `{"dataType":"Map","value":[["key","value"]]}`
//!
//! A top-level `Undefined` is written as the bare word `undefined`. Reading
//! never fails: anything that does not parse as JSON is returned as a string.

use serde_json::{Map, Value};

use crate::{CacheError, CacheValue};

const UNDEFINED: &str = "undefined";
const BUFFER_TAG: &str = "Buffer";
const MAP_TAG: &str = "Map";

/// Encode a value for storage.
pub fn encode(value: &CacheValue) -> Result<String, CacheError> {
    if value.is_undefined() {
        return Ok(UNDEFINED.to_owned());
    }
    Ok(serde_json::to_string(&to_tagged_json(value))?)
}

/// Decode a stored string, falling back to the raw string when it is not JSON.
pub fn decode(raw: &str) -> CacheValue {
    if raw == UNDEFINED {
        return CacheValue::Undefined;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(json) => revive(json),
        Err(_) => CacheValue::String(raw.to_owned()),
    }
}

fn to_tagged_json(value: &CacheValue) -> Value {
    match value {
        CacheValue::Undefined | CacheValue::Null => Value::Null,
        CacheValue::Bool(b) => Value::Bool(*b),
        CacheValue::Number(n) => Value::Number(n.clone()),
        CacheValue::String(s) => Value::String(s.clone()),
        CacheValue::Array(items) => Value::Array(items.iter().map(to_tagged_json).collect()),
        CacheValue::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(_, v)| !v.is_undefined())
                .map(|(k, v)| (k.clone(), to_tagged_json(v)))
                .collect(),
        ),
        CacheValue::Bytes(bytes) => {
            let mut tagged = Map::new();
            tagged.insert("type".to_owned(), Value::from(BUFFER_TAG));
            tagged.insert(
                "data".to_owned(),
                Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            );
            Value::Object(tagged)
        }
        CacheValue::Map(entries) => {
            let pairs = entries
                .iter()
                .map(|(k, v)| Value::Array(vec![to_tagged_json(k), to_tagged_json(v)]))
                .collect();
            let mut tagged = Map::new();
            tagged.insert("dataType".to_owned(), Value::from(MAP_TAG));
            tagged.insert("value".to_owned(), Value::Array(pairs));
            Value::Object(tagged)
        }
    }
}

fn revive(json: Value) -> CacheValue {
    match json {
        Value::Array(items) => CacheValue::Array(items.into_iter().map(revive).collect()),
        Value::Object(fields) => {
            if let Some(bytes) = as_buffer(&fields) {
                return CacheValue::Bytes(bytes);
            }
            if is_map(&fields)
                && let Some(Value::Array(pairs)) = fields.get("value")
            {
                return CacheValue::Map(
                    pairs
                        .iter()
                        .filter_map(|pair| match pair {
                            Value::Array(kv) if kv.len() == 2 => {
                                Some((revive(kv[0].clone()), revive(kv[1].clone())))
                            }
                            _ => None,
                        })
                        .collect(),
                );
            }
            CacheValue::Object(fields.into_iter().map(|(k, v)| (k, revive(v))).collect())
        }
        other => other.into(),
    }
}

fn as_buffer(fields: &Map<String, Value>) -> Option<Vec<u8>> {
    if fields.len() != 2 || fields.get("type")?.as_str()? != BUFFER_TAG {
        return None;
    }
    fields
        .get("data")?
        .as_array()?
        .iter()
        .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect()
}

fn is_map(fields: &Map<String, Value>) -> bool {
    fields.len() == 2
        && fields.get("dataType").and_then(Value::as_str) == Some(MAP_TAG)
        && fields
            .get("value")
            .and_then(Value::as_array)
            .is_some_and(|pairs| {
                pairs
                    .iter()
                    .all(|p| p.as_array().is_some_and(|kv| kv.len() == 2))
            })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn roundtrip(value: CacheValue) -> CacheValue {
        decode(&encode(&value).unwrap())
    }

    #[test]
    fn test_undefined_is_a_bare_word() {
        assert_eq!(encode(&CacheValue::Undefined).unwrap(), "undefined");
        assert_eq!(decode("undefined"), CacheValue::Undefined);
    }

    #[test]
    fn test_buffer_is_tagged() {
        let encoded = encode(&CacheValue::Bytes(b"hi".to_vec())).unwrap();
        let json: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(json, json!({"type": "Buffer", "data": [104, 105]}));
        assert_eq!(decode(&encoded), CacheValue::Bytes(b"hi".to_vec()));
    }

    #[test]
    fn test_nested_map_and_buffer_survive() {
        let mut fields = BTreeMap::new();
        fields.insert("blob".to_owned(), CacheValue::Bytes(vec![0, 255, 7]));
        fields.insert(
            "lookup".to_owned(),
            CacheValue::Map(vec![
                (CacheValue::from(1i64), CacheValue::from("one")),
                (CacheValue::from("two"), CacheValue::Bytes(vec![2])),
            ]),
        );
        fields.insert("list".to_owned(), CacheValue::from(json!([1, "a", null])));
        let value = CacheValue::Object(fields);
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn test_strings_that_look_like_json_fall_back() {
        assert_eq!(decode("{toto"), CacheValue::from("{toto"));
        assert_eq!(decode("[toto"), CacheValue::from("[toto"));
        assert_eq!(decode("plain text"), CacheValue::from("plain text"));
    }

    #[test]
    fn test_strings_roundtrip_even_when_they_look_like_json() {
        for s in ["{toto", "[1,2]", "undefined", "42", ""] {
            assert_eq!(roundtrip(CacheValue::from(s)), CacheValue::from(s));
        }
    }

    #[test]
    fn test_nested_undefined_follows_json_rules() {
        let mut fields = BTreeMap::new();
        fields.insert("a".to_owned(), CacheValue::Undefined);
        fields.insert(
            "b".to_owned(),
            CacheValue::Array(vec![CacheValue::Undefined, CacheValue::from(true)]),
        );
        let decoded = roundtrip(CacheValue::Object(fields));
        assert_eq!(decoded, CacheValue::from(json!({"b": [null, true]})));
    }

    #[test]
    fn test_lookalike_objects_are_not_revived() {
        let v = decode(r#"{"type":"Buffer","data":[1,2],"extra":true}"#);
        assert!(matches!(v, CacheValue::Object(_)));
        let v = decode(r#"{"type":"Buffer","data":[300]}"#);
        assert!(matches!(v, CacheValue::Object(_)));
        let v = decode(r#"{"dataType":"Map","value":[[1]]}"#);
        assert!(matches!(v, CacheValue::Object(_)));
    }
}
