//! 能力参数 Schema（schemars 自动生成）与调用前校验
//!
//! 每个能力用一个 `#[derive(Deserialize, JsonSchema)]` 参数结构体声明输入；
//! schema 既拼入 prompt，也在调用前用于检查必填字段与基础类型。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 参数结构体的 JSON Schema
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 将 JSON 参数解析为强类型结构体
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))
}

fn type_matches(expected: &str, v: &Value) -> bool {
    match expected {
        "string" => v.is_string(),
        "integer" => v.is_i64() || v.is_u64(),
        "number" => v.is_number(),
        "boolean" => v.is_boolean(),
        "array" => v.is_array(),
        "object" => v.is_object(),
        "null" => v.is_null(),
        _ => true,
    }
}

/// 轻量校验：args 必须是对象，required 字段必须存在，声明了 type 的字段类型须一致
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let obj = args
        .as_object()
        .ok_or_else(|| "arguments must be a JSON object".to_string())?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|k| !obj.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required field(s): {}", missing.join(", ")));
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in obj {
            let Some(expected) = props.get(key).and_then(|p| p.get("type")) else {
                continue;
            };
            // schemars 对 Option<T> 生成 ["string", "null"]
            let ok = match expected {
                Value::String(t) => type_matches(t, value),
                Value::Array(ts) => ts
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|t| type_matches(t, value)),
                _ => true,
            };
            if !ok {
                return Err(format!("field '{key}' should be {expected}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct FetchArgs {
        url: String,
        max_chars: Option<u32>,
    }

    #[test]
    fn test_schema_lists_required() {
        let schema = schema_of::<FetchArgs>();
        assert_eq!(schema["required"], json!(["url"]));
        assert!(schema["properties"]["max_chars"].is_object());
    }

    #[test]
    fn test_validate_args() {
        let schema = schema_of::<FetchArgs>();
        assert!(validate_args(&schema, &json!({"url": "https://a"})).is_ok());
        assert!(validate_args(&schema, &json!({"url": "https://a", "max_chars": null})).is_ok());
        let err = validate_args(&schema, &json!({})).unwrap_err();
        assert!(err.contains("url"));
        assert!(validate_args(&schema, &json!({"url": 3})).is_err());
        assert!(validate_args(&schema, &json!("https://a")).is_err());
    }

    #[test]
    fn test_parse_args() {
        let a: FetchArgs = parse_args(json!({"url": "u"})).unwrap();
        assert_eq!(a.url, "u");
        assert!(a.max_chars.is_none());
    }
}
