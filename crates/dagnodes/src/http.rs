use async_trait::async_trait;
use dagcore::{Node, NodeContext, NodeError, Value};
use dagruntime::{NodeFactory, NodeMetadata, PortDefinition};
use std::collections::BTreeMap;

const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

fn method_of(config: &Value) -> String {
    config
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or("GET")
        .to_uppercase()
}

#[async_trait]
impl Node for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http.request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let url_value = ctx
            .inputs
            .get("url")
            .or_else(|| ctx.config.get("url"))
            .ok_or_else(|| NodeError::MissingInput("url".to_string()))?;
        let url = url_value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "url".to_string(),
            expected: "string".to_string(),
            actual: url_value.kind().to_string(),
        })?;
        let method = method_of(&ctx.config);

        ctx.events.info(format!("{} {}", method, url));

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        let body = ctx.inputs.get("body").or_else(|| ctx.config.get("body"));
        match body {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(Value::Null) | None => {}
            Some(json) => request = request.json(json),
        }

        // Add headers if provided
        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key, val_str);
                }
            }
        }

        let response = tokio::select! {
            response = request.send() => response
                .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => {
                return Err(NodeError::ExecutionFailed("HTTP request cancelled".to_string()));
            }
        };

        let status = response.status().as_u16();
        let headers_map: BTreeMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status));

        let mut output = BTreeMap::new();
        output.insert("status".to_string(), Value::from(status as i64));
        if let Ok(json) = serde_json::from_str::<Value>(&body_text) {
            output.insert("json".to_string(), json);
        }
        output.insert("body".to_string(), Value::String(body_text));
        output.insert("headers".to_string(), Value::Object(headers_map));
        Ok(Value::Object(output))
    }

    fn validate_config(&self, config: &Value) -> Result<(), NodeError> {
        let method = method_of(config);
        if !METHODS.contains(&method.as_str()) {
            return Err(NodeError::Configuration(format!("Unsupported method: {}", method)));
        }
        Ok(())
    }
}

pub struct HttpRequestNodeFactory;

impl NodeFactory for HttpRequestNodeFactory {
    fn create(&self, _config: &Value) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(HttpRequestNode::new()))
    }

    fn node_type(&self) -> &str {
        "http.request"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            inputs: vec![
                PortDefinition::new("url", "Target URL (or config.url)", false),
                PortDefinition::new("body", "Request body", false),
            ],
            outputs: vec![],
        }
    }
}
