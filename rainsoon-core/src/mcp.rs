//! Model Context Protocol server for rainsoon.
//!
//! Newline-delimited JSON-RPC 2.0. Exposes one tool, `check_for_rain`, and one
//! prompt, `rainsoon`, that tells the agent to call that tool and hand back its
//! raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::{
    check::RainChecker,
    model::{RainRequest, outcome_json},
};

/// MCP Protocol version
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const SERVER_NAME: &str = "rainsoon";

pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const TOOL_NAME: &str = "check_for_rain";

pub const PROMPT_NAME: &str = "rainsoon";

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// JSON-RPC error code.
    pub fn code(&self) -> i32 {
        match self {
            McpError::Parse(_) => -32700,
            McpError::MethodNotFound(_) => -32601,
            McpError::InvalidParams(_) => -32602,
            McpError::Io(_) | McpError::Json(_) => -32603,
        }
    }
}

/// JSON-RPC Request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// `None` only when the member is absent; `"id": null` is `Some(Value::Null)`.
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC Response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// Always written; `null` when the request id could not be read.
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    pub fn error(id: Value, err: &McpError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code: err.code(), message: err.to_string() }),
        }
    }
}

/// Tool definition for MCP
#[derive(Debug, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
pub struct PromptArgument {
    pub name: String,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Serialize)]
pub struct Prompt {
    pub name: String,
    pub description: String,
    pub arguments: Vec<PromptArgument>,
}

pub struct RainsoonServer {
    checker: RainChecker,
    default_threshold: i64,
}

impl RainsoonServer {
    pub fn new(checker: RainChecker, default_threshold: i64) -> Self {
        Self { checker, default_threshold }
    }

    fn tool(&self) -> Tool {
        Tool {
            name: TOOL_NAME.to_string(),
            description: "Check near-term rain probability for an IP address. If `ip` is \
                          omitted or blank, the current public IP is auto-detected. \
                          `threshold` is the percentage considered \"rain soon\"."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ip": {
                        "type": "string",
                        "description": "IP address to check; blank auto-detects",
                        "default": ""
                    },
                    "threshold": {
                        "type": "integer",
                        "description": "Percent chance at or above which rain is reported",
                        "default": self.default_threshold
                    }
                },
                "required": []
            }),
        }
    }

    fn prompt(&self) -> Prompt {
        Prompt {
            name: PROMPT_NAME.to_string(),
            description: "Check whether rain is likely soon and return the raw tool JSON."
                .to_string(),
            arguments: vec![
                PromptArgument {
                    name: "ip".to_string(),
                    description: "IP address to check; blank auto-detects".to_string(),
                    required: false,
                },
                PromptArgument {
                    name: "threshold".to_string(),
                    description: format!(
                        "Rain threshold percent (default {})",
                        self.default_threshold
                    ),
                    required: false,
                },
            ],
        }
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "prompts": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            },
            "instructions": "rainsoon answers \"will it rain soon?\" for an IP address.\n\n\
                             Tool: check_for_rain(ip?, threshold?) returns JSON with the \
                             location, precipitation chance and a yes/no message.\n\
                             Prompt: rainsoon(ip?, threshold?) calls the tool and returns \
                             its raw JSON."
        })
    }

    fn parse_request(&self, arguments: &Value) -> Result<RainRequest, McpError> {
        let ip = match arguments.get("ip") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(McpError::InvalidParams(format!("`ip` must be a string, got {other}")));
            }
        };

        let threshold = match arguments.get("threshold") {
            None | Some(Value::Null) => self.default_threshold,
            Some(value) => parse_threshold(value)?,
        };

        Ok(RainRequest::new(ip, threshold))
    }

    async fn handle_tools_call(&self, params: &Value) -> Result<Value, McpError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::InvalidParams("Missing tool name".to_string()))?;

        if name != TOOL_NAME {
            return Err(McpError::InvalidParams(format!("Unknown tool: {name}")));
        }

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let request = self.parse_request(&arguments)?;

        info!(ip = ?request.ip, threshold = request.threshold, "Tool called: {TOOL_NAME}");

        let outcome = self.checker.check_for_rain(&request).await;
        if let Err(err) = &outcome {
            warn!(kind = err.kind(), "rain check failed: {err}");
        }

        let text = serde_json::to_string(&outcome_json(&outcome))?;

        let mut result = json!({
            "content": [{
                "type": "text",
                "text": text
            }]
        });
        if outcome.is_err() {
            result["isError"] = json!(true);
        }
        Ok(result)
    }

    fn handle_prompts_get(&self, params: &Value) -> Result<Value, McpError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::InvalidParams("Missing prompt name".to_string()))?;

        if name != PROMPT_NAME {
            return Err(McpError::InvalidParams(format!("Unknown prompt: {name}")));
        }

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let request = self.parse_request(&arguments)?;

        Ok(json!({
            "description": "Check for rain soon",
            "messages": [{
                "role": "user",
                "content": {
                    "type": "text",
                    "text": prompt_text(&request)
                }
            }]
        }))
    }

    /// Handle a single JSON-RPC message. Notifications never produce a response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("Handling request: {}", request.method);

        if request.jsonrpc != "2.0" {
            warn!("Unexpected jsonrpc version {:?}", request.jsonrpc);
        }

        let Some(id) = request.id else {
            debug!("Notification: {}", request.method);
            return None;
        };

        let result = match request.method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": [self.tool()] })),
            "tools/call" => self.handle_tools_call(&request.params).await,
            "prompts/list" => Ok(json!({ "prompts": [self.prompt()] })),
            "prompts/get" => self.handle_prompts_get(&request.params),
            other => {
                warn!("Unknown method: {}", other);
                Err(McpError::MethodNotFound(other.to_string()))
            }
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::error(id, &err),
        })
    }

    /// Serve requests from `reader` until EOF, writing one response line per request.
    ///
    /// Lines are read as raw bytes, so input that is not UTF-8 or not JSON gets a
    /// parse-error response and the loop keeps going.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();

        info!("MCP server ready, listening on stdio...");

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }

            let line = buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            debug!("Received: {}", String::from_utf8_lossy(line));

            let response = match serde_json::from_slice::<JsonRpcRequest>(line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!("Failed to parse request: {}", e);
                    let err = McpError::Parse(e.to_string());
                    Some(JsonRpcResponse::error(Value::Null, &err))
                }
            };

            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!("Sending: {}", response_json);
                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        info!("stdin closed, shutting down");
        Ok(())
    }

    /// Run the MCP server over stdio
    pub async fn run_stdio(&self) -> anyhow::Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout()).await
    }
}

/// Accepts a JSON integer, an integral float, or a numeric string.
fn parse_threshold(value: &Value) -> Result<i64, McpError> {
    let parsed = match value {
        Value::Number(n) => {
            n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| {
        McpError::InvalidParams(format!("`threshold` must be an integer, got {value}"))
    })
}

fn prompt_text(request: &RainRequest) -> String {
    format!(
        "Call the tool `{TOOL_NAME}` with ip=\"{}\" and threshold={}.\n\
         Return ONLY the tool's raw JSON (no commentary).",
        request.ip.as_deref().unwrap_or(""),
        request.threshold
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{HourlyEntry, HourlySeries, Location},
        provider::{ForecastProvider, Geolocator, IpLookup},
    };
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    #[derive(Debug)]
    struct NoIp;

    #[async_trait]
    impl IpLookup for NoIp {
        fn name(&self) -> &str {
            "none"
        }

        async fn public_ip(&self) -> anyhow::Result<String> {
            Err(anyhow!("offline"))
        }
    }

    #[derive(Debug)]
    struct Wheaton;

    #[async_trait]
    impl Geolocator for Wheaton {
        fn name(&self) -> &str {
            "wheaton"
        }

        async fn locate(&self, _ip: &str) -> anyhow::Result<Location> {
            Ok(Location { lat: 39.03, lng: -77.05, place_name: "Wheaton".into() })
        }
    }

    #[derive(Debug)]
    struct Fixed(u8);

    #[async_trait]
    impl ForecastProvider for Fixed {
        async fn hourly_precipitation(&self, _lat: f64, _lng: f64) -> anyhow::Result<HourlySeries> {
            let time = (Utc::now() + Duration::minutes(5)).fixed_offset();
            Ok(HourlySeries::new(vec![HourlyEntry { time, precipitation_probability: self.0 }]))
        }
    }

    fn server(chance: u8) -> RainsoonServer {
        let checker = RainChecker::new(
            vec![Box::new(NoIp)],
            vec![Box::new(Wheaton)],
            Box::new(Fixed(chance)),
        );
        RainsoonServer::new(checker, 20)
    }

    fn request(id: Option<Value>, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest { jsonrpc: "2.0".to_string(), id, method: method.to_string(), params }
    }

    async fn call(srv: &RainsoonServer, id: i64, method: &str, params: Value) -> JsonRpcResponse {
        srv.handle_request(request(Some(json!(id)), method, params))
            .await
            .expect("requests with an id get a response")
    }

    fn tool_payload(response: &JsonRpcResponse) -> Value {
        let result = response.result.as_ref().expect("tool call succeeds at protocol level");
        let text = result["content"][0]["text"].as_str().expect("text content");
        serde_json::from_str(text).expect("payload is JSON")
    }

    async fn serve_lines(srv: &RainsoonServer, input: &[u8]) -> Vec<Value> {
        let mut output = Vec::new();
        srv.serve(input, &mut output).await.expect("serve");

        String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect()
    }

    #[tokio::test]
    async fn initialize_advertises_tools_and_prompts() {
        let resp = call(&server(0), 1, "initialize", json!({})).await;
        let result = resp.result.expect("result");

        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "rainsoon");
        assert!(result["capabilities"]["tools"].is_object());
        assert!(result["capabilities"]["prompts"].is_object());
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let srv = server(0);
        let initialized = request(None, "notifications/initialized", Value::Null);
        assert!(srv.handle_request(initialized).await.is_none());
        assert!(srv.handle_request(request(None, "bogus", Value::Null)).await.is_none());
    }

    #[tokio::test]
    async fn explicit_null_id_is_answered() {
        let resp = server(0)
            .handle_request(request(Some(Value::Null), "ping", Value::Null))
            .await
            .expect("null id is a request, not a notification");

        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.result, Some(json!({})));
    }

    #[test]
    fn missing_and_null_ids_deserialize_differently() {
        let missing: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping"}"#).expect("parse");
        let null: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).expect("parse");

        assert_eq!(missing.id, None);
        assert_eq!(null.id, Some(Value::Null));
    }

    #[tokio::test]
    async fn tools_list_exposes_check_for_rain() {
        let resp = call(&server(0), 2, "tools/list", Value::Null).await;
        let tools = &resp.result.expect("result")["tools"];

        assert_eq!(tools.as_array().map(Vec::len), Some(1));
        assert_eq!(tools[0]["name"], "check_for_rain");
        assert_eq!(tools[0]["inputSchema"]["properties"]["threshold"]["default"], 20);
    }

    #[tokio::test]
    async fn tool_call_returns_report_json() {
        let params = json!({
            "name": "check_for_rain",
            "arguments": {"ip": "134.231.2.45", "threshold": 35}
        });
        let resp = call(&server(40), 3, "tools/call", params).await;

        let payload = tool_payload(&resp);
        assert_eq!(payload["ip"], "134.231.2.45");
        assert_eq!(payload["rain"], true);
        assert_eq!(payload["precipitation_chance"], 40);
        assert_eq!(payload["threshold"], 35);
        assert_eq!(payload["message"], "Yes, 40% chance of rain soon in Wheaton.");
        assert!(resp.result.expect("result").get("isError").is_none());
    }

    #[tokio::test]
    async fn tool_call_defaults_threshold_and_accepts_numeric_strings() {
        let srv = server(20);

        let params = json!({"name": "check_for_rain", "arguments": {"ip": "1.1.1.1"}});
        let resp = call(&srv, 4, "tools/call", params).await;
        assert_eq!(tool_payload(&resp)["threshold"], 20);

        let params = json!({
            "name": "check_for_rain",
            "arguments": {"ip": "1.1.1.1", "threshold": "25"}
        });
        let resp = call(&srv, 5, "tools/call", params).await;
        let payload = tool_payload(&resp);
        assert_eq!(payload["threshold"], 25);
        assert_eq!(payload["rain"], false);
    }

    #[tokio::test]
    async fn failed_check_is_an_error_shaped_tool_result() {
        let params = json!({"name": "check_for_rain", "arguments": {"ip": ""}});
        let resp = call(&server(50), 6, "tools/call", params).await;

        assert!(resp.error.is_none(), "not a protocol fault");
        let payload = tool_payload(&resp);
        assert_eq!(payload["kind"], "ResolutionError");
        assert!(payload.get("rain").is_none());
        assert_eq!(resp.result.expect("result")["isError"], true);
    }

    #[tokio::test]
    async fn bad_arguments_are_invalid_params() {
        let srv = server(0);

        let params = json!({"name": "check_for_rain", "arguments": {"threshold": "lots"}});
        let resp = call(&srv, 7, "tools/call", params).await;
        assert_eq!(resp.error.expect("error").code, -32602);

        let resp = call(&srv, 8, "tools/call", json!({"name": "make_it_rain"})).await;
        assert_eq!(resp.error.expect("error").code, -32602);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let resp = call(&server(0), 9, "resources/list", Value::Null).await;
        assert_eq!(resp.error.expect("error").code, -32601);
    }

    #[tokio::test]
    async fn prompt_forwards_arguments_to_tool_instruction() {
        let srv = server(0);

        let resp = call(&srv, 10, "prompts/list", Value::Null).await;
        assert_eq!(resp.result.expect("result")["prompts"][0]["name"], "rainsoon");

        let params = json!({"name": "rainsoon", "arguments": {"ip": "8.8.8.8", "threshold": "35"}});
        let resp = call(&srv, 11, "prompts/get", params).await;
        let result = resp.result.expect("result");
        let text = result["messages"][0]["content"]["text"].as_str().expect("text");

        assert!(text.contains("`check_for_rain` with ip=\"8.8.8.8\" and threshold=35."));
        assert!(text.contains("Return ONLY the tool's raw JSON"));
    }

    #[test]
    fn threshold_parsing() {
        assert_eq!(parse_threshold(&json!(35)).expect("int"), 35);
        assert_eq!(parse_threshold(&json!(35.0)).expect("integral float"), 35);
        assert_eq!(parse_threshold(&json!(" 7 ")).expect("string"), 7);
        assert!(parse_threshold(&json!(35.5)).is_err());
        assert!(parse_threshold(&json!(true)).is_err());
    }

    #[tokio::test]
    async fn serve_answers_each_request_line() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n",
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            "not json\n",
            r#"{"jsonrpc":"2.0","id":"two","method":"tools/list"}"#,
            "\n",
        );

        let lines = serve_lines(&server(0), input.as_bytes()).await;

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[0]["result"], json!({}));
        assert_eq!(lines[1]["error"]["code"], -32700);
        assert_eq!(lines[2]["id"], "two");
        assert_eq!(lines[2]["result"]["tools"][0]["name"], "check_for_rain");
    }

    #[tokio::test]
    async fn parse_error_reply_carries_null_id() {
        let lines = serve_lines(&server(0), b"not json\n").await;

        assert_eq!(lines.len(), 1);
        let reply = lines[0].as_object().expect("object");
        assert_eq!(reply.get("id"), Some(&Value::Null));
        assert_eq!(lines[0]["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_stop_the_server() {
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);

        let lines = serve_lines(&server(0), &input).await;

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["error"]["code"], -32700);
        assert_eq!(lines[0]["id"], Value::Null);
        assert_eq!(lines[1]["id"], 1);
        assert_eq!(lines[1]["result"], json!({}));
    }
}
