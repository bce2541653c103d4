//! Line-protocol dispatch.
//!
//! Reads one JSON-RPC request per stdin line, routes `tools/call` through
//! the router, and writes one response per stdout line. Notifications get no
//! response; any uncaught tool failure becomes a -32603 error with a
//! redacted message.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use marketmux_core::{redact_secrets, CallContext, Router, RouterError};

use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::tools::{list_tools, parse_tool_call};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol front end over one router.
pub struct Service {
    router: Arc<Router>,
}

impl Service {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    /// Drives the request/response loop until the input stream ends.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(line).await {
                writer.write_all(response.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        info!("input stream closed, shutting down");
        Ok(())
    }

    /// Handles one raw line; `None` means no response is owed (notification).
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(_) => {
                let response =
                    JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error());
                return serde_json::to_string(&response).ok();
            }
        };

        let response = self.handle_request(request).await?;
        serde_json::to_string(&response).ok()
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::failure(
                request.id,
                JsonRpcError::invalid_request(),
            ));
        }
        if request.is_notification() {
            debug!(method = %request.method, "ignoring notification");
            return None;
        }

        debug!(method = %request.method, "handling request");
        let outcome = match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {
                    "name": "marketmux",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "tools/list" => Ok(json!({"tools": list_tools()})),
            "tools/call" => self.handle_tool_call(&request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::failure(request.id, error),
        })
    }

    async fn handle_tool_call(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let Some(name) = params["name"].as_str() else {
            return Err(JsonRpcError::invalid_params(
                "tools/call requires a 'name' argument",
            ));
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let request =
            parse_tool_call(name, &arguments).map_err(JsonRpcError::invalid_params)?;

        match self.router.dispatch(&request, &CallContext::new()).await {
            Ok(text) => Ok(json!({
                "content": [{"type": "text", "text": text}],
            })),
            Err(error) => Err(JsonRpcError::internal_error(shape_router_error(&error))),
        }
    }
}

fn shape_router_error(error: &RouterError) -> String {
    let message = match error {
        RouterError::Cancelled => String::from("request cancelled"),
        RouterError::Exhausted(failure) => {
            format!("{}: {}", failure.surfaced_kind(), failure)
        }
    };
    redact_secrets(&message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketmux_core::{build_provider, AppConfig, OfflineTransport};
    use std::sync::Arc;

    fn service() -> Service {
        let config = Arc::new(AppConfig::default());
        let transport: Arc<dyn marketmux_core::UpstreamTransport> = Arc::new(OfflineTransport);
        let providers = config
            .providers
            .iter()
            .filter_map(|provider| build_provider(provider, Arc::clone(&transport)))
            .collect();
        Service::new(Arc::new(Router::new(config, providers)))
    }

    async fn call(service: &Service, line: &str) -> Value {
        let response = service
            .handle_line(line)
            .await
            .expect("response expected");
        serde_json::from_str(&response).expect("response is JSON")
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_server_info() {
        let service = service();
        let response = call(
            &service,
            r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#,
        )
        .await;

        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(response["result"]["serverInfo"]["name"], "marketmux");
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_returns_the_closed_set() {
        let service = service();
        let response = call(&service, r#"{"jsonrpc":"2.0","method":"tools/list","id":2}"#).await;
        let tools = response["result"]["tools"]
            .as_array()
            .expect("tools array");
        assert_eq!(tools.len(), 10);
    }

    #[tokio::test]
    async fn tool_call_wraps_payload_as_text_content() {
        let service = service();
        let response = call(
            &service,
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"get_stock_info","arguments":{"ticker":"AAPL"}},"id":3}"#,
        )
        .await;

        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.contains("Stock information for AAPL"));
        assert_eq!(response["result"]["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn news_call_merges_providers_with_attribution() {
        let service = service();
        let response = call(
            &service,
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"get_yahoo_finance_news","arguments":{"ticker":"AAPL"}},"id":4}"#,
        )
        .await;

        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        // The two mock providers publish the same headline; aggregation plus
        // dedup must merge them and attribute publishers, not provider ids.
        assert!(text.contains("Sources: MarketWatch, Reuters"), "got: {text}");
        assert!(text.contains("Merged Count: 1"));
        assert!(!text.contains("yahoo"), "provider ids must not leak");
        assert!(!text.contains("alphavantage"), "provider ids must not leak");
    }

    #[tokio::test]
    async fn invalid_arguments_surface_as_invalid_params() {
        let service = service();
        let response = call(
            &service,
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"get_stock_info","arguments":{}},"id":5}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn unknown_methods_get_method_not_found() {
        let service = service();
        let response = call(
            &service,
            r#"{"jsonrpc":"2.0","method":"resources/list","id":6}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn malformed_json_gets_parse_error() {
        let service = service();
        let response = call(&service, "{not json").await;
        assert_eq!(response["error"]["code"], -32700);
        assert!(response["id"].is_null());
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let service = service();
        let response = service
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn serve_loop_answers_line_by_line() {
        let service = service();
        let input = b"{\"jsonrpc\":\"2.0\",\"method\":\"initialize\",\"id\":1}\n{\"jsonrpc\":\"2.0\",\"method\":\"tools/list\",\"id\":2}\n";
        let mut output = std::io::Cursor::new(Vec::new());

        service
            .serve(&input[..], &mut output)
            .await
            .expect("serve runs to EOF");

        let output = output.into_inner();
        let lines: Vec<&str> = std::str::from_utf8(&output)
            .expect("utf8 output")
            .lines()
            .collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).expect("first response");
        assert_eq!(first["id"], 1);
    }
}
