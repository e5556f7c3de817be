//! In-process backend.
//!
//! Runs script-type tasks through the crate's own sandboxed evaluator. No
//! external context exists, so `setup` and `cleanup` only log intent. Script
//! execution trusts the capability author to the extent the evaluator allows,
//! which is: no host access at all.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::capability::types::{Task, TaskDependencies, ValueMap};
use crate::error::{EngineError, EngineResult};
use crate::providers::ExecutionProvider;
use crate::script;

#[derive(Debug, Default)]
pub struct LocalProvider;

impl LocalProvider {
    pub fn new() -> Self {
        Self
    }

    fn supported_language(task: &Task) -> EngineResult<()> {
        let language = task.language.as_deref().unwrap_or("");
        if language.eq_ignore_ascii_case("javascript") || language.eq_ignore_ascii_case("typescript")
        {
            Ok(())
        } else {
            Err(EngineError::UnsupportedLanguage(language.to_string()))
        }
    }
}

#[async_trait]
impl ExecutionProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn setup(
        &mut self,
        task: &Task,
        dependencies: Option<&TaskDependencies>,
    ) -> EngineResult<bool> {
        if dependencies.map(|d| !d.packages.is_empty()).unwrap_or(false) {
            log::warn!(
                "local backend cannot install packages declared by task '{}'; the script must not import them",
                task.id
            );
        }
        log::debug!("local backend: no setup needed for task '{}'", task.id);
        Ok(true)
    }

    async fn execute_code(
        &self,
        task: &Task,
        inputs: &ValueMap,
        environment: &HashMap<String, Value>,
    ) -> EngineResult<ValueMap> {
        Self::supported_language(task)?;
        let code = task
            .code
            .as_deref()
            .ok_or_else(|| EngineError::MissingCode(task.id.clone()))?;
        script::evaluate(code, inputs, environment)
            .map_err(|e| EngineError::ScriptExecution(e.to_string()))
    }

    async fn cleanup(&mut self) -> EngineResult<bool> {
        log::debug!("local backend: nothing to clean up");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: Value) -> ValueMap {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn executes_javascript_tasks() {
        let provider = LocalProvider::new();
        let task = Task::script("double", "JavaScript", "output.n = inputs.n * 2;");
        let out = provider
            .execute_code(&task, &inputs(json!({"n": 21})), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(out.get("n"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn typescript_tag_is_accepted() {
        let provider = LocalProvider::new();
        let task = Task::script("t", "typescript", "output.ok = true;");
        let out = provider
            .execute_code(&task, &ValueMap::new(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(out.get("ok"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn unsupported_language_and_missing_code() {
        let provider = LocalProvider::new();

        let task = Task::script("py", "python", "output['x'] = 1");
        let err = provider
            .execute_code(&task, &ValueMap::new(), &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UnsupportedLanguage");

        let mut task = Task::script("empty", "javascript", "");
        task.code = None;
        let err = provider
            .execute_code(&task, &ValueMap::new(), &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MissingCode");
    }

    #[tokio::test]
    async fn script_faults_become_script_execution_errors() {
        let provider = LocalProvider::new();
        let task = Task::script("boom", "javascript", "output.x = missing_variable;");
        let err = provider
            .execute_code(&task, &ValueMap::new(), &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ScriptExecutionError");
        assert!(err.to_string().contains("missing_variable"));
    }

    #[tokio::test]
    async fn setup_and_cleanup_are_safe_no_ops() {
        let mut provider = LocalProvider::new();
        let task = Task::script("t", "javascript", "output.ok = true;");
        assert!(provider.setup(&task, None).await.unwrap());
        assert!(provider.cleanup().await.unwrap());
        // Cleanup without setup is fine too.
        assert!(provider.cleanup().await.unwrap());
    }
}
