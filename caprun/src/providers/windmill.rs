//! Remote-workflow backend.
//!
//! Delegates execution to a Windmill instance through its synchronous
//! preview endpoint (`run_wait_result`). Construction requires an access
//! token; `setup` and `cleanup` are no-ops because the remote service owns
//! the execution context.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::capability::types::{Task, TaskDependencies, ValueMap};
use crate::config::WindmillOptions;
use crate::error::{EngineError, EngineResult};
use crate::providers::ExecutionProvider;

#[derive(Debug)]
pub struct WindmillProvider {
    client: reqwest::Client,
    base_url: Url,
    workspace: String,
    token: String,
}

impl WindmillProvider {
    /// Build a provider from the configured options. Fails immediately when
    /// no access token is configured.
    pub fn new(options: &WindmillOptions, default_timeout_ms: u64) -> EngineResult<Self> {
        let token = options
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(EngineError::MissingCredential)?;
        let base_url = Url::parse(&options.base_url)
            .map_err(|e| EngineError::Config(format!("invalid windmill base url: {}", e)))?;
        let timeout_ms = options.timeout_ms.unwrap_or(default_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url,
            workspace: options.workspace.clone(),
            token,
        })
    }

    /// Map a task language tag onto the remote runtime's language names.
    fn remote_language(task: &Task) -> EngineResult<&'static str> {
        let language = task.language.as_deref().unwrap_or("");
        if language.eq_ignore_ascii_case("javascript") || language.eq_ignore_ascii_case("typescript")
        {
            Ok("deno")
        } else if language.eq_ignore_ascii_case("python") {
            Ok("python3")
        } else if language.eq_ignore_ascii_case("bash") {
            Ok("bash")
        } else {
            Err(EngineError::UnsupportedLanguage(language.to_string()))
        }
    }
}

#[async_trait]
impl ExecutionProvider for WindmillProvider {
    fn name(&self) -> &'static str {
        "windmill"
    }

    async fn setup(
        &mut self,
        task: &Task,
        _dependencies: Option<&TaskDependencies>,
    ) -> EngineResult<bool> {
        // The remote service resolves dependencies from the script imports.
        log::debug!("windmill backend: no local setup for task '{}'", task.id);
        Ok(true)
    }

    async fn execute_code(
        &self,
        task: &Task,
        inputs: &ValueMap,
        environment: &HashMap<String, Value>,
    ) -> EngineResult<ValueMap> {
        let language = Self::remote_language(task)?;
        let code = task
            .code
            .as_deref()
            .ok_or_else(|| EngineError::MissingCode(task.id.clone()))?;

        let endpoint = self
            .base_url
            .join(&format!(
                "api/w/{}/jobs/run_wait_result/preview",
                self.workspace
            ))
            .map_err(|e| EngineError::Config(format!("invalid windmill endpoint: {}", e)))?;
        let env_object: ValueMap = environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let body = json!({
            "content": code,
            "language": language,
            "args": {
                "inputs": Value::Object(inputs.clone()),
                "environment": Value::Object(env_object),
            },
        });

        log::debug!(
            "windmill backend: running task '{}' as {} on workspace '{}'",
            task.id,
            language,
            self.workspace
        );
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EngineError::Execution(format!(
                "windmill returned {} for task '{}': {}",
                status,
                task.id,
                detail.trim()
            )));
        }

        match response.json::<Value>().await? {
            Value::Object(map) => Ok(map),
            other => {
                let mut map = ValueMap::new();
                map.insert("result".to_string(), other);
                Ok(map)
            }
        }
    }

    async fn cleanup(&mut self) -> EngineResult<bool> {
        log::debug!("windmill backend: nothing to clean up");
        Ok(true)
    }
}
