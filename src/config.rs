use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::origin::DEFAULT_SCRIPT_NAME;

/// Runtime configuration for the widget runner and admin client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub jsonrpc_url: String,
    pub namespace: Option<String>,
    pub rpc_timeout: Duration,
    /// File name the widget's own `<script src>` ends with.
    pub embed_script: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jsonrpc_url = std::env::var("YTD_JSONRPC_URL")
            .unwrap_or_else(|_| "http://localhost:8080/jsonrpc".to_string());
        url::Url::parse(&jsonrpc_url).context("failed to parse YTD_JSONRPC_URL")?;

        let namespace = std::env::var("YTD_NAMESPACE")
            .ok()
            .filter(|ns| !ns.trim().is_empty());

        let rpc_timeout = std::env::var("YTD_RPC_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_secs(5));

        let embed_script =
            std::env::var("YTD_EMBED_SCRIPT").unwrap_or_else(|_| DEFAULT_SCRIPT_NAME.to_string());

        Ok(Self {
            jsonrpc_url,
            namespace,
            rpc_timeout,
            embed_script,
        })
    }
}
