use crate::models::{Chunk, DocumentIdentity, Metadata};
use serde_json::Value;

/// Picks the first populated identity field, in priority order.
pub fn document_identity(metadata: &Metadata, identity_fields: &[String]) -> Option<DocumentIdentity> {
    identity_fields
        .iter()
        .filter_map(|field| metadata.get(field))
        .find_map(identity_value)
}

pub fn chunk_identity(chunk: &Chunk, identity_fields: &[String]) -> Option<DocumentIdentity> {
    document_identity(&chunk.metadata, identity_fields)
}

fn identity_value(value: &Value) -> Option<DocumentIdentity> {
    match value {
        Value::String(text) => DocumentIdentity::normalize(text),
        // Spreadsheet exports store numeric ids as floats ("1234.0").
        Value::Number(number) => match number.as_f64() {
            Some(float) if float.fract() == 0.0 && float.abs() < 9.0e15 => {
                DocumentIdentity::normalize(&format!("{}", float as i64))
            }
            _ => DocumentIdentity::normalize(&number.to_string()),
        },
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
