//! Stdio request loop.
//!
//! Requests arrive as JSON lines on stdin. Responses pass through the
//! engine's protocol adapter at the outer boundary, so large or repetitive
//! payloads leave compressed or binary-framed.

use std::sync::Arc;

use file_engine::{FileEngine, PayloadKind};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::protocol::{Request, Response};
use crate::tools::{self, PARSE_ERROR};

/// Serves requests until stdin closes.
pub async fn run(engine: Arc<FileEngine>) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&engine, &line).await;
        let body = serde_json::to_vec(&response)?;
        let encoded = engine.protocol().encode(&body, PayloadKind::Text)?;

        stdout.write_all(&encoded).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

/// Parses and dispatches a single request line.
pub async fn handle_line(engine: &Arc<FileEngine>, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(error) => {
            return Response::err(Value::Null, PARSE_ERROR, format!("invalid request: {error}"));
        }
    };

    tracing::debug!(method = %request.method, "dispatching");
    match tools::dispatch(engine, &request.method, request.params).await {
        Ok(result) => Response::ok(request.id, result),
        Err(error) => Response::err(request.id, error.code, error.message),
    }
}
