//! Pure payload-shaping functions between client JSON and store documents.
//!
//! Clients speak loosely-typed JSON with a public `id` field; the store
//! speaks bson with a native `_id` ObjectId. Everything that crosses that
//! boundary goes through here: identifier coercion, timestamp stamping and
//! update-operator wrapping on the way in, `_id` -> `id` renaming on the way
//! out. No I/O, no state.

use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use serde_json::{Map, Value};
use thiserror::Error;

/// A caller-supplied `id` that cannot be converted to the store's native
/// identifier form. Inserts carrying one must fail, not adopt it.
#[derive(Debug, Error)]
#[error("id is not a valid native identifier")]
pub struct InvalidIdError;

/// Converts a client filter into a store filter. Non-object input yields an
/// empty (match-all) filter; the route layer rejects those shapes earlier.
/// A client-facing `id` key is renamed to `_id`, with 24-hex strings coerced
/// to ObjectId so equality matches work against native keys. All other keys
/// pass through untouched, so arbitrary query operators stay expressible.
pub fn normalize_filter(filter: &Value) -> Document {
    let Some(map) = filter.as_object() else {
        return Document::new();
    };
    let mut out = Document::new();
    for (key, value) in map {
        if key == "id" {
            out.insert("_id", coerce_object_id(json_to_bson(value)));
        } else {
            out.insert(key.clone(), json_to_bson(value));
        }
    }
    out
}

/// Shapes a raw client document for insertion. `id` is promoted to `_id`
/// when no native key was supplied (and stripped either way), and
/// `createdAt`/`updatedAt` are stamped with the current time when absent.
/// A supplied `id` that does not parse as an ObjectId is rejected rather
/// than stored verbatim. Field types beyond that are not validated; this
/// is a generic store.
pub fn normalize_insert_document(document: &Value) -> Result<Document, InvalidIdError> {
    let mut out = Document::new();
    if let Some(map) = document.as_object() {
        for (key, value) in map {
            if key == "id" {
                continue;
            }
            out.insert(key.clone(), json_to_bson(value));
        }
        if !out.contains_key("_id") {
            if let Some(id) = map.get("id") {
                let oid = id
                    .as_str()
                    .and_then(|s| ObjectId::parse_str(s).ok())
                    .ok_or(InvalidIdError)?;
                out.insert("_id", oid);
            }
        }
    }
    let now = DateTime::now();
    if !out.contains_key("createdAt") {
        out.insert("createdAt", now);
    }
    if !out.contains_key("updatedAt") {
        out.insert("updatedAt", now);
    }
    Ok(out)
}

/// Shapes a client update payload so that every update refreshes `updatedAt`
/// exactly once. Operator-form payloads (any top-level `$` key) get
/// `updatedAt` merged into their `$set` (created if missing, caller-supplied
/// value preserved); plain payloads are wrapped whole in a `$set`.
pub fn normalize_update_payload(update: &Value) -> Document {
    let now = DateTime::now();

    if let Some(map) = update.as_object() {
        if map.keys().any(|k| k.starts_with('$')) {
            let mut out = Document::new();
            for (key, value) in map {
                out.insert(key.clone(), json_to_bson(value));
            }
            if let Some(Bson::Document(set)) = out.get_mut("$set") {
                if !set.contains_key("updatedAt") {
                    set.insert("updatedAt", now);
                }
            } else {
                out.insert("$set", doc! { "updatedAt": now });
            }
            return out;
        }
    }

    let mut set = Document::new();
    if let Some(map) = update.as_object() {
        for (key, value) in map {
            set.insert(key.clone(), json_to_bson(value));
        }
    }
    if !set.contains_key("updatedAt") {
        set.insert("updatedAt", now);
    }
    doc! { "$set": set }
}

/// Output direction: renames the native `_id` to a public `id` string and
/// converts bson values to plain JSON. `id` is emitted first.
pub fn normalize_document(doc: Document) -> Value {
    let mut out = Map::new();
    for (key, value) in doc {
        if key == "_id" {
            out.insert("id".into(), id_to_json(value));
        } else {
            out.insert(key, bson_to_json(value));
        }
    }
    Value::Object(out)
}

fn id_to_json(id: Bson) -> Value {
    match id {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        other => bson_to_json(other),
    }
}

fn coerce_object_id(value: Bson) -> Bson {
    match value {
        Bson::String(s) => match ObjectId::parse_str(&s) {
            Ok(oid) => Bson::ObjectId(oid),
            Err(_) => Bson::String(s),
        },
        other => other,
    }
}

/// Explicit JSON -> bson conversion. Integer-valued numbers become Int64,
/// everything else double; no extended-JSON interpretation of `$`-keys.
pub fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else {
                Bson::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            let mut doc = Document::new();
            for (key, value) in map {
                doc.insert(key.clone(), json_to_bson(value));
            }
            Bson::Document(doc)
        }
    }
}

/// bson -> JSON for response bodies: ObjectIds as hex strings, timestamps as
/// RFC 3339, the rest structurally.
pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::from(i),
        Bson::Int64(i) => Value::from(i),
        Bson::Double(d) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(
            dt.try_to_rfc3339_string()
                .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        ),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(doc) => {
            let mut out = Map::new();
            for (key, value) in doc {
                out.insert(key, bson_to_json(value));
            }
            Value::Object(out)
        }
        other => other.into_relaxed_extjson(),
    }
}
