use code_index_indexer::IndexerError;
use serde::Serialize;
use serde_json::{json, Value};

/// `{"ok": true, "data": ...}`
pub fn success<T: Serialize>(data: &T) -> anyhow::Result<Value> {
    Ok(json!({ "ok": true, "data": serde_json::to_value(data)? }))
}

/// `{"ok": false, "error": {code, message, detail}}`
pub fn failure(err: &anyhow::Error) -> Value {
    let (code, message, detail) = match err.downcast_ref::<IndexerError>() {
        Some(indexer) => (indexer.code(), indexer.to_string(), indexer.detail()),
        None => ("INTERNAL_ERROR", format!("{err:#}"), None),
    };
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "detail": detail,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_uses_indexer_codes() {
        let err = anyhow::Error::new(IndexerError::NotInitialized("/repo".into()));
        let value = failure(&err);
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["code"], "NOT_INITIALIZED");
        assert!(value["error"]["detail"].is_null());
    }

    #[test]
    fn unknown_errors_are_internal() {
        let value = failure(&anyhow::anyhow!("boom"));
        assert_eq!(value["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(value["error"]["message"], "boom");
    }

    #[test]
    fn success_wraps_data() {
        let value = success(&json!({"files_indexed": 2})).unwrap();
        assert_eq!(value, json!({"ok": true, "data": {"files_indexed": 2}}));
    }
}
