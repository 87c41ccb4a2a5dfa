//! Dispatch table translating named tool calls into engine operations.

use std::sync::Arc;

use file_engine::{EngineError, FileEngine};
use serde::Deserialize;
use serde_json::{json, Value};

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A tool-level failure: a stable code plus a message for the caller.
#[derive(Debug)]
pub struct ToolError {
    pub code: i64,
    pub message: String,
}

impl ToolError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ToolError {
    fn from(error: EngineError) -> Self {
        let code = match &error {
            EngineError::AccessDenied(_) => -32001,
            EngineError::Io(_) => -32002,
            EngineError::FileTooLarge(_) => -32003,
            EngineError::NotEditable(_) => -32004,
            EngineError::NoMatch => -32005,
            EngineError::Cancelled => -32006,
            EngineError::InvalidPattern(_) | EngineError::InvalidConfig(_) => INVALID_PARAMS,
            _ => INTERNAL_ERROR,
        };
        Self::new(code, error.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathParams {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteParams {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditParams {
    path: String,
    old_text: String,
    new_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplaceParams {
    path: String,
    pattern: String,
    replacement: String,
    #[serde(default = "default_case_sensitive")]
    case_sensitive: bool,
}

fn default_case_sensitive() -> bool {
    true
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    serde_json::from_value(params)
        .map_err(|error| ToolError::new(INVALID_PARAMS, format!("invalid params: {error}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value)
        .map_err(|error| ToolError::new(INTERNAL_ERROR, format!("serialization failed: {error}")))
}

/// Routes one named call to the engine.
pub async fn dispatch(
    engine: &Arc<FileEngine>,
    method: &str,
    params: Value,
) -> Result<Value, ToolError> {
    match method {
        "read_file" => {
            let p: PathParams = parse(params)?;
            let content = engine.read(&p.path).await?;
            Ok(json!({
                "content": String::from_utf8_lossy(content.as_ref()),
                "bytes": content.as_ref().len(),
            }))
        }
        "write_file" => {
            let p: WriteParams = parse(params)?;
            let bytes = p.content.len();
            engine.write(&p.path, p.content).await?;
            Ok(json!({ "written": bytes }))
        }
        "list_directory" => {
            let p: PathParams = parse(params)?;
            let listing = engine.list(&p.path).await?;
            Ok(json!({ "listing": &*listing }))
        }
        "edit_block" => {
            let p: EditParams = parse(params)?;
            let result = engine.edit(&p.path, &p.old_text, &p.new_text).await?;
            to_json(&result)
        }
        "search_replace" => {
            let p: ReplaceParams = parse(params)?;
            let report = engine
                .search_and_replace(&p.path, &p.pattern, &p.replacement, p.case_sensitive)
                .await?;
            to_json(&report)
        }
        "stats" => to_json(&engine.stats()),
        other => Err(ToolError::new(
            METHOD_NOT_FOUND,
            format!("unknown method: {other}"),
        )),
    }
}
