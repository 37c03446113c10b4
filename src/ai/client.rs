//! Replicate API 客户端
//!
//! 用于离线整理会话记录：创建 prediction 后轮询直到完成。
//!
//! API Key 读取优先级：
//! 1. 配置文件 `~/.config/empusa/config.json`（字段 `replicate_api_key` 和可选 `replicate_base_url`）
//! 2. 环境变量 `REPLICATE_API_KEY`（可以来自 `.env`）

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::time::Duration;
use tracing::{debug, warn};

/// Replicate API 基础 URL
pub const REPLICATE_API_URL: &str = "https://api.replicate.com/v1";

/// 默认模型
pub const DEFAULT_MODEL: &str = "deepseek-ai/deepseek-v3";

/// 单次请求超时（毫秒）
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_TOP_P: f32 = 0.9;

/// 轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// 最多轮询次数
pub const DEFAULT_MAX_POLLS: u32 = 60;

/// Replicate 客户端配置
#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_key: String,
    /// API 基础 URL（支持代理）
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: REPLICATE_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

impl ReplicateConfig {
    /// 从配置文件和环境变量加载
    pub fn auto_load() -> Result<Self> {
        let (api_key, base_url) = Self::load_api_config()?;
        Ok(Self {
            api_key,
            base_url,
            ..Self::default()
        })
    }

    fn load_api_config() -> Result<(String, String)> {
        let default_url = REPLICATE_API_URL.to_string();

        // 1. ~/.config/empusa/config.json
        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config/empusa/config.json");
            if let Ok(content) = fs::read_to_string(&config_path) {
                if let Ok(config) = serde_json::from_str::<Value>(&content) {
                    let key = config
                        .get("replicate_api_key")
                        .and_then(|k| k.as_str())
                        .filter(|k| !k.is_empty());
                    if let Some(key) = key {
                        let url = config
                            .get("replicate_base_url")
                            .and_then(|u| u.as_str())
                            .filter(|u| !u.is_empty())
                            .map(|u| u.trim_end_matches('/').to_string())
                            .unwrap_or_else(|| default_url.clone());
                        debug!(base_url = %url, "Using API key from ~/.config/empusa/config.json");
                        return Ok((key.to_string(), url));
                    }
                }
            }
        }

        // 2. 环境变量
        if let Ok(key) = std::env::var("REPLICATE_API_KEY") {
            if !key.trim().is_empty() {
                debug!("Using REPLICATE_API_KEY from environment");
                return Ok((key.trim().to_string(), default_url));
            }
        }

        Err(anyhow!(
            "No Replicate API key found. Set REPLICATE_API_KEY (environment or .env) \
             or add replicate_api_key to ~/.config/empusa/config.json"
        ))
    }
}

/// 创建 prediction 的请求体
#[derive(Debug, Serialize)]
pub(crate) struct PredictionRequest {
    pub input: PredictionInput,
}

#[derive(Debug, Serialize)]
pub(crate) struct PredictionInput {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// prediction 状态
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub urls: Option<PredictionUrls>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionUrls {
    pub get: String,
}

impl Prediction {
    /// `succeeded` 时返回输出文本
    pub fn output_text(&self) -> Option<String> {
        match self.output.as_ref()? {
            Value::String(s) => Some(s.clone()),
            // 流式模型按 token 返回数组
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(""),
            ),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    /// 把终态转成结果，未结束时返回 None
    pub fn into_result(self) -> Option<Result<String>> {
        match self.status.as_str() {
            "succeeded" => Some(
                self.output_text()
                    .ok_or_else(|| anyhow!("Prediction succeeded without text output")),
            ),
            "failed" | "canceled" => {
                let reason = self
                    .error
                    .as_ref()
                    .map(|e| match e {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| self.status.clone());
                Some(Err(anyhow!("AI cleanup failed: {}", reason)))
            }
            _ => None,
        }
    }
}

/// Replicate API 客户端
pub struct ReplicateClient {
    client: reqwest::blocking::Client,
    pub(crate) config: ReplicateConfig,
}

impl ReplicateClient {
    pub fn new(config: ReplicateConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| anyhow!("Cannot create HTTP client: {}", e))?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub(crate) fn predictions_url(&self) -> String {
        format!(
            "{}/models/{}/predictions",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// 创建 prediction
    pub fn create_prediction(&self, prompt: &str) -> Result<Prediction> {
        let request = PredictionRequest {
            input: PredictionInput {
                prompt: prompt.to_string(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                top_p: self.config.top_p,
            },
        };

        debug!(
            model = %self.config.model,
            prompt_len = prompt.len(),
            "Creating Replicate prediction"
        );

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(self.predictions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .map_err(|e| {
                anyhow!(
                    "API request failed after {}ms: {}",
                    start.elapsed().as_millis(),
                    e
                )
            })?;

        Self::parse_response(response)
    }

    /// 查询 prediction 状态
    pub fn get_prediction(&self, url: &str) -> Result<Prediction> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.api_key)
            .send()
            .map_err(|e| anyhow!("Polling prediction failed: {}", e))?;

        Self::parse_response(response)
    }

    fn parse_response(response: reqwest::blocking::Response) -> Result<Prediction> {
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| anyhow!("Failed to read response: {}", e))?;

        if !status.is_success() {
            return Err(anyhow!("API error ({}): {}", status, body));
        }

        serde_json::from_str(&body)
            .map_err(|e| anyhow!("Failed to parse response: {} - body: {}", e, body))
    }

    /// 提交 prompt 并等待结果，每次轮询未完成时调用 `on_pending(第几次)`
    pub fn complete_with_progress<F>(&self, prompt: &str, mut on_pending: F) -> Result<String>
    where
        F: FnMut(u32),
    {
        let prediction = self.create_prediction(prompt)?;
        debug!(id = ?prediction.id, status = %prediction.status, "Prediction created");
        if prediction.is_terminal() {
            if let Some(result) = prediction.into_result() {
                return result;
            }
            return Err(anyhow!("Prediction finished in an unknown state"));
        }

        let url = prediction
            .urls
            .map(|u| u.get)
            .ok_or_else(|| anyhow!("Prediction response has no polling URL"))?;

        for attempt in 1..=self.config.max_polls {
            std::thread::sleep(self.config.poll_interval);
            let current = self.get_prediction(&url)?;
            if let Some(result) = current.into_result() {
                debug!(attempt, "Prediction finished");
                return result;
            }
            on_pending(attempt);
        }

        warn!(polls = self.config.max_polls, "Prediction timed out");
        Err(anyhow!(
            "Timeout: no result after {} polls",
            self.config.max_polls
        ))
    }
}
