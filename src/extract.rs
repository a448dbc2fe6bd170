use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::Config;
use crate::models::ExtractionResult;

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "shortcut-extract-api/1.0";
const ASYNC_HEADER: &str = "X-DashScope-Async";

const MODEL: &str = "qwen-vl-plus";

const EXTRACTION_PROMPT: &str = "请从这张图片中精确提取以下信息，并以JSON格式返回：\n\
1. title: 活动标题\n\
2. content: 主要内容\n\
3. location: 活动地点\n\
4. time: 活动时间（如果是日期时间请转换为标准格式）\n\
5. requirements: 活动要求\n\
\n\
如果某项信息不存在，请设置为空字符串。确保返回纯JSON格式，不要有其他文字。\
示例：{\"title\": \"会议\", \"content\": \"项目讨论\", \"location\": \"会议室A\", \"time\": \"2024-01-20 14:00\", \"requirements\": \"携带资料\"}";

// ── Lazy static regexes ──────────────────────────────────────────────────────

// Greedy on purpose: first `{` through the last `}` in the answer.
static JSON_OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("upstream API request failed: {status}")]
    Upstream { status: StatusCode, body: String },
    #[error("{0}")]
    Request(String),
    #[error("upstream returned invalid JSON: {0}")]
    InvalidResponse(String),
    #[error("AI processing failed: unable to extract information")]
    NoText,
    #[error("AI returned malformed format")]
    NoJson,
    #[error("AI returned malformed data")]
    MalformedJson(#[source] serde_json::Error),
}

// ── Public API ───────────────────────────────────────────────────────────────

pub fn build_client() -> Result<reqwest::Client, ExtractionError> {
    reqwest::ClientBuilder::new()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ExtractionError::Request(e.to_string()))
}

/// Sends one image to the vision model and normalizes its answer.
pub async fn extract_from_image(
    client: &reqwest::Client,
    config: &Config,
    api_key: &str,
    image: &str,
) -> Result<ExtractionResult, ExtractionError> {
    let answer = call_upstream(client, config, api_key, image)
        .await
        .map_err(|e| {
            if let ExtractionError::Upstream { status, body } = &e {
                error!(status = status.as_u16(), body = %body, "upstream request failed");
            }
            e
        })?;

    let text = first_text(&answer).ok_or_else(|| {
        error!("no text item in upstream response");
        ExtractionError::NoText
    })?;
    info!(text, "extracted text");

    parse_answer(text)
}

// ── Upstream call ────────────────────────────────────────────────────────────

pub fn build_generation_body(image: &str) -> Value {
    json!({
        "model": MODEL,
        "input": {
            "messages": [
                {
                    "role": "user",
                    "content": [
                        { "image": image },
                        { "text": EXTRACTION_PROMPT }
                    ]
                }
            ]
        },
        "parameters": {
            "result_format": "message"
        }
    })
}

async fn call_upstream(
    client: &reqwest::Client,
    config: &Config,
    api_key: &str,
    image: &str,
) -> Result<Value, ExtractionError> {
    let url = config.generation_url();
    info!(%url, model = MODEL, "calling upstream vision model");

    let response = client
        .post(url)
        .bearer_auth(api_key)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(ASYNC_HEADER, "enable")
        .json(&build_generation_body(image))
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Request(format!("TimeoutError: {}", e))
            } else if e.is_connect() {
                ExtractionError::Request(format!("ConnectError: {}", e))
            } else {
                ExtractionError::Request(format!("RequestError: {}", e))
            }
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ExtractionError::Request(e.to_string()))?;

    if !status.is_success() {
        return Err(ExtractionError::Upstream { status, body });
    }

    info!(body = %body, "upstream response");
    serde_json::from_str(&body).map_err(|e| ExtractionError::InvalidResponse(e.to_string()))
}

// ── Answer parsing ───────────────────────────────────────────────────────────

/// Walks `output.choices[0].message.content` and returns the first non-empty
/// `text` item. Any shape mismatch along the way yields `None`.
pub fn first_text(answer: &Value) -> Option<&str> {
    answer
        .get("output")?
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_array()?
        .iter()
        .find_map(|item| item.get("text").and_then(Value::as_str).filter(|t| !t.is_empty()))
}

pub fn locate_json(text: &str) -> Option<&str> {
    JSON_OBJECT_RE.find(text).map(|m| m.as_str())
}

pub fn parse_answer(text: &str) -> Result<ExtractionResult, ExtractionError> {
    let raw = locate_json(text).ok_or_else(|| {
        error!(text, "no JSON object in model answer");
        ExtractionError::NoJson
    })?;

    let parsed: Value = serde_json::from_str(raw).map_err(|e| {
        error!(error = %e, raw, "failed to parse model JSON");
        ExtractionError::MalformedJson(e)
    })?;

    Ok(ExtractionResult {
        title: field_text(&parsed, "title"),
        content: field_text(&parsed, "content"),
        location: field_text(&parsed, "location"),
        time: field_text(&parsed, "time"),
        requirements: field_text(&parsed, "requirements"),
    })
}

/// Falsy values (absent, null, false, 0, "") become `""`; everything else is
/// rendered as text so the field is always a string.
fn field_text(parsed: &Value, key: &str) -> String {
    match parsed.get(key) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(true)) => "true".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer_with(content: Value) -> Value {
        json!({
            "output": {
                "choices": [
                    { "message": { "role": "assistant", "content": content } }
                ]
            }
        })
    }

    #[test]
    fn test_first_text_skips_items_without_text() {
        let answer = answer_with(json!([
            { "image": "ignored" },
            { "text": "" },
            { "text": "first" },
            { "text": "second" }
        ]));
        assert_eq!(first_text(&answer), Some("first"));
    }

    #[test]
    fn test_first_text_shape_mismatch() {
        assert_eq!(first_text(&json!({})), None);
        assert_eq!(first_text(&json!({ "output": { "choices": [] } })), None);
        assert_eq!(first_text(&answer_with(json!("plain string"))), None);
        assert_eq!(first_text(&answer_with(json!([{ "text": 42 }]))), None);
        assert_eq!(first_text(&json!({ "output": "oops" })), None);
    }

    #[test]
    fn test_locate_json_is_greedy() {
        assert_eq!(locate_json("noise {\"a\":1} trailing"), Some("{\"a\":1}"));
        assert_eq!(locate_json("{a} and {b}"), Some("{a} and {b}"));
        assert_eq!(locate_json("line\n{\n\"a\": 1\n}\n"), Some("{\n\"a\": 1\n}"));
        assert_eq!(locate_json("no braces here"), None);
        assert_eq!(locate_json("} backwards {"), None);
    }

    #[test]
    fn test_parse_answer_full() {
        let text = r#"noise {"title":"T","content":"C","location":"L","time":"2024-01-20 14:00","requirements":"R"} trailing"#;
        let result = parse_answer(text).unwrap();
        assert_eq!(
            result,
            ExtractionResult {
                title: "T".into(),
                content: "C".into(),
                location: "L".into(),
                time: "2024-01-20 14:00".into(),
                requirements: "R".into(),
            }
        );
    }

    #[test]
    fn test_parse_answer_missing_fields_default_to_empty() {
        let result = parse_answer(r#"{"title":"T","location":null,"time":0}"#).unwrap();
        assert_eq!(result.title, "T");
        assert_eq!(result.content, "");
        assert_eq!(result.location, "");
        assert_eq!(result.time, "");
        assert_eq!(result.requirements, "");
    }

    #[test]
    fn test_parse_answer_coerces_non_strings() {
        let result = parse_answer(r#"{"title":2024,"content":true,"requirements":["a","b"]}"#).unwrap();
        assert_eq!(result.title, "2024");
        assert_eq!(result.content, "true");
        assert_eq!(result.requirements, r#"["a","b"]"#);
    }

    #[test]
    fn test_parse_answer_errors() {
        assert!(matches!(parse_answer("nothing useful"), Err(ExtractionError::NoJson)));
        assert!(matches!(
            parse_answer("{title: unquoted}"),
            Err(ExtractionError::MalformedJson(_))
        ));
        assert_eq!(
            parse_answer("{title: unquoted}").unwrap_err().to_string(),
            "AI returned malformed data"
        );
    }

    #[test]
    fn test_generation_body_shape() {
        let body = build_generation_body("data:image/png;base64,AAAA");
        assert_eq!(body["model"], "qwen-vl-plus");
        assert_eq!(body["parameters"]["result_format"], "message");
        let content = body["input"]["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["image"], "data:image/png;base64,AAAA");
        let prompt = content[1]["text"].as_str().unwrap();
        for field in ["title", "content", "location", "time", "requirements"] {
            assert!(prompt.contains(field));
        }
        assert!(prompt.contains("请设置为空字符串"));
        assert!(prompt.contains("不要有其他文字"));
        assert_eq!(locate_json(prompt).map(|raw| parse_answer(raw).is_ok()), Some(true));
    }

    #[test]
    fn test_upstream_error_message_carries_status() {
        let err = ExtractionError::Upstream {
            status: StatusCode::BAD_GATEWAY,
            body: "secret upstream detail".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("502"));
        assert!(!msg.contains("secret"));
    }
}
