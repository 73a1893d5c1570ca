//! Batched JSON-RPC transport.

use async_trait::async_trait;
use serde_json::Value;

/// One element of a JSON-RPC batch.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub method: &'static str,
    pub params: Value,
}

/// Reply for one batch element. A transport-level failure aborts the whole
/// batch; element-level JSON-RPC errors come back here as data.
#[derive(Debug, Clone, Default)]
pub struct BatchReply {
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Batched JSON-RPC capability the engine runs against. The production
/// implementation speaks HTTP; tests substitute canned upstreams.
#[async_trait]
pub trait BatchRpc: Send + Sync + 'static {
    /// Issue one transport batch. The reply vector is index-aligned with
    /// `entries`.
    async fn batch_call(&self, entries: &[BatchEntry]) -> anyhow::Result<Vec<BatchReply>>;
}

/// JSON-RPC over HTTP with array batching.
pub struct HttpRpc {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpRpc {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let trimmed = url.trim();
        let parsed = trimmed
            .parse::<reqwest::Url>()
            .map_err(|err| anyhow::anyhow!("invalid upstream RPC url `{trimmed}`: {err}"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url: parsed,
        })
    }
}

#[async_trait]
impl BatchRpc for HttpRpc {
    async fn batch_call(&self, entries: &[BatchEntry]) -> anyhow::Result<Vec<BatchReply>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            body.push(serde_json::json!({
                "jsonrpc": "2.0",
                "id": (i as u64) + 1,
                "method": entry.method,
                "params": entry.params,
            }));
        }

        let resp = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| anyhow::anyhow!("batch transport error: {err}"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("batch http error: {status}");
        }
        let parsed: Value = resp
            .json()
            .await
            .map_err(|err| anyhow::anyhow!("batch decode error: {err}"))?;
        let arr = parsed
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("batch response is not an array"))?;

        // Replies may arrive in any order; pair them back by id.
        let mut replies = vec![BatchReply::default(); entries.len()];
        for item in arr {
            let Some(id) = item.get("id").and_then(|v| v.as_u64()) else {
                continue;
            };
            let idx = (id as usize).wrapping_sub(1);
            if idx >= replies.len() {
                continue;
            }
            if let Some(err) = item.get("error") {
                let code = err.get("code").and_then(|v| v.as_i64()).unwrap_or_default();
                let msg = err
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("missing error message");
                replies[idx].error = Some(format!("json-rpc error code {code}: {msg}"));
                continue;
            }
            replies[idx].result = item.get("result").cloned();
        }
        Ok(replies)
    }
}
