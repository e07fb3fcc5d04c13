use crate::ipc::error::err;
use crate::ipc::types::Request;

pub fn param_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn param_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

pub fn require_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, serde_json::Value> {
    param_str(req, key).ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn require_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    param_i64(req, key).ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn row_error(index: usize, code: &str, message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "index": index,
        "code": code,
        "message": message.into(),
    })
}
