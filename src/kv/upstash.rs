//! REST-based Redis client (Upstash-compatible)
//!
//! Each command is POSTed as a JSON array (`["SET", "k", "v"]`) with a bearer
//! token and answered with `{"result": ...}` or `{"error": "..."}`. There is no
//! persistent connection, so the client is always considered open.

use crate::core::error::{Result, VodError};
use crate::kv::connection::ConnectionOptions;
use crate::kv::KvClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const LABEL: &str = "Upstash";

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Value,
    error: Option<String>,
}

impl CommandResponse {
    fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(VodError::BackendError(error)),
            None => Ok(self.result),
        }
    }
}

pub struct UpstashClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl UpstashClient {
    pub fn new(url: &str, token: &str, options: ConnectionOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    async fn post(&self, url: String, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(VodError::connection(
                LABEL,
                format!("Connection failed with HTTP {}", status),
            ));
        }
        Ok(response)
    }

    /// Run one command and return its raw `result`
    async fn command(&self, args: Value) -> Result<Value> {
        let response = self.post(self.base_url.clone(), &args).await?;
        let body: CommandResponse = response.json().await?;
        body.into_result()
    }

    /// Run several commands in one MULTI/EXEC transaction
    async fn transaction(&self, commands: Value) -> Result<Vec<Value>> {
        let url = format!("{}/multi-exec", self.base_url);
        let response = self.post(url, &commands).await?;
        let bodies: Vec<CommandResponse> = response.json().await?;
        bodies.into_iter().map(CommandResponse::into_result).collect()
    }
}

fn string_args(command: &str, keys: &[String]) -> Value {
    let mut args = vec![Value::String(command.to_string())];
    args.extend(keys.iter().cloned().map(Value::String));
    Value::Array(args)
}

fn to_opt_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn to_u64(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| VodError::DeserializationError(format!("expected integer reply, got {}", value)))
}

fn to_string_vec(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.into_iter().filter_map(to_opt_string).collect()),
        other => Err(VodError::DeserializationError(format!("expected array reply, got {}", other))),
    }
}

#[async_trait]
impl KvClient for UpstashClient {
    fn label(&self) -> &str {
        LABEL
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.command(json!(["PING"])).await.map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(to_opt_string(self.command(json!(["GET", key])).await?))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.command(json!(["SET", key, value])).await.map(|_| ())
    }

    async fn set_ex(&self, key: &str, seconds: u64, value: &str) -> Result<()> {
        self.command(json!(["SETEX", key, seconds, value])).await.map(|_| ())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        to_u64(&self.command(string_args("DEL", keys)).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(to_u64(&self.command(json!(["EXISTS", key])).await?)? > 0)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        to_string_vec(self.command(json!(["KEYS", pattern])).await?)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        match self.command(string_args("MGET", keys)).await? {
            Value::Array(items) => Ok(items.into_iter().map(to_opt_string).collect()),
            other => Err(VodError::DeserializationError(format!(
                "expected array reply, got {}",
                other
            ))),
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        to_string_vec(self.command(json!(["LRANGE", key, start, stop])).await?)
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64> {
        to_u64(&self.command(json!(["LREM", key, count, value])).await?)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        to_u64(&self.command(json!(["LPUSH", key, value])).await?)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.command(json!(["LTRIM", key, start, stop])).await.map(|_| ())
    }

    async fn push_capped(&self, key: &str, value: &str, max_len: usize) -> Result<()> {
        let stop = max_len as i64 - 1;
        self.transaction(json!([
            ["LREM", key, 0, value],
            ["LPUSH", key, value],
            ["LTRIM", key, 0, stop],
        ]))
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let ok: CommandResponse = serde_json::from_str(r#"{"result":"OK"}"#).unwrap();
        assert_eq!(ok.into_result().unwrap(), json!("OK"));

        let nil: CommandResponse = serde_json::from_str(r#"{"result":null}"#).unwrap();
        assert_eq!(to_opt_string(nil.into_result().unwrap()), None);

        let err: CommandResponse =
            serde_json::from_str(r#"{"error":"WRONGPASS invalid password"}"#).unwrap();
        let err = err.into_result().unwrap_err();
        assert!(err.to_string().contains("WRONGPASS"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_reply_conversions() {
        assert_eq!(to_u64(&json!(3)).unwrap(), 3);
        assert_eq!(to_u64(&json!("7")).unwrap(), 7);
        assert!(to_u64(&json!("x")).is_err());

        assert_eq!(
            to_string_vec(json!(["a", null, "b"])).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(to_string_vec(json!(null)).unwrap().is_empty());
        assert!(to_string_vec(json!("scalar")).is_err());
    }

    #[test]
    fn test_command_encoding() {
        let keys = vec!["u:a:pwd".to_string(), "u:b:pwd".to_string()];
        assert_eq!(string_args("DEL", &keys), json!(["DEL", "u:a:pwd", "u:b:pwd"]));
    }

    #[tokio::test]
    async fn test_trailing_slash_trimmed() {
        let client =
            UpstashClient::new("https://example.upstash.io/", "t", ConnectionOptions::default())
                .unwrap();
        assert_eq!(client.base_url, "https://example.upstash.io");
        assert!(client.is_open());
    }
}
