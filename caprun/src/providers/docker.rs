//! Containerized backend.
//!
//! One provider instance owns at most one running container: `setup` starts
//! it (or reuses the one already started for this run), `execute_code`
//! delegates into it through `docker exec`, and `cleanup` force-removes it.
//! Inputs and environment cross the boundary as JSON in environment
//! variables; the wrapper inside the container prints the populated `output`
//! map as JSON on its last stdout line.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use uuid::Uuid;

use crate::capability::types::{Task, TaskDependencies, ValueMap};
use crate::config::DockerOptions;
use crate::error::{EngineError, EngineResult};
use crate::providers::ExecutionProvider;

#[derive(Debug)]
pub struct DockerProvider {
    options: DockerOptions,
    /// Name of the container this instance started, once `setup` has run.
    container: Option<String>,
}

impl DockerProvider {
    pub fn new(options: DockerOptions) -> Self {
        Self {
            options,
            container: None,
        }
    }

    async fn docker(&self, args: &[&str]) -> EngineResult<String> {
        let output = Command::new(&self.options.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Execution(format!(
                "{} {} failed: {}",
                self.options.binary,
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn start_container(&mut self) -> EngineResult<String> {
        let name = format!("caprun-{}", Uuid::new_v4());
        let memory = self.options.memory_mb.map(|mb| format!("{}m", mb));
        let mut args: Vec<&str> = vec!["run", "-d", "--name", name.as_str()];
        if let Some(memory) = memory.as_deref() {
            args.push("--memory");
            args.push(memory);
        }
        args.extend_from_slice(&[self.options.image.as_str(), "tail", "-f", "/dev/null"]);
        self.docker(&args).await?;
        log::debug!("started container '{}' from image '{}'", name, self.options.image);
        self.container = Some(name.clone());
        Ok(name)
    }

    async fn install_packages(
        &self,
        container: &str,
        task: &Task,
        dependencies: &TaskDependencies,
    ) -> EngineResult<()> {
        if dependencies.packages.is_empty() {
            return Ok(());
        }
        let installer: &[&str] = match interpreter_for(task)? {
            Interpreter::Node => &["npm", "install", "--no-save"],
            Interpreter::Python => &["pip", "install", "--quiet"],
        };
        let specs: Vec<String> = dependencies
            .packages
            .iter()
            .map(|p| match &p.version {
                Some(version) => format!("{}@{}", p.name, version),
                None => p.name.clone(),
            })
            .collect();
        let mut args = vec!["exec", container];
        args.extend_from_slice(installer);
        args.extend(specs.iter().map(String::as_str));
        log::debug!("installing {} package(s) in '{}'", specs.len(), container);
        self.docker(&args).await?;
        Ok(())
    }
}

#[derive(Debug)]
enum Interpreter {
    Node,
    Python,
}

fn interpreter_for(task: &Task) -> EngineResult<Interpreter> {
    let language = task.language.as_deref().unwrap_or("");
    if language.eq_ignore_ascii_case("javascript") || language.eq_ignore_ascii_case("typescript") {
        Ok(Interpreter::Node)
    } else if language.eq_ignore_ascii_case("python") {
        Ok(Interpreter::Python)
    } else {
        Err(EngineError::UnsupportedLanguage(language.to_string()))
    }
}

/// Wrap task source so the container process reads `inputs`/`environment`
/// from its environment and prints the `output` map as its last stdout line.
fn wrap_source(interpreter: &Interpreter, code: &str) -> String {
    match interpreter {
        Interpreter::Node => format!(
            "const inputs = JSON.parse(process.env.CAPRUN_INPUTS);\n\
             const environment = JSON.parse(process.env.CAPRUN_ENVIRONMENT);\n\
             const output = {{}};\n\
             {}\n\
             console.log(JSON.stringify(output));",
            code
        ),
        Interpreter::Python => format!(
            "import json, os\n\
             inputs = json.loads(os.environ[\"CAPRUN_INPUTS\"])\n\
             environment = json.loads(os.environ[\"CAPRUN_ENVIRONMENT\"])\n\
             output = {{}}\n\
             {}\n\
             print(json.dumps(output))",
            code
        ),
    }
}

fn parse_output(stdout: &str, task_id: &str) -> EngineResult<ValueMap> {
    let last_line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");
    match serde_json::from_str(last_line) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => {
            // A bare value still counts as output, under a single key.
            let mut map = ValueMap::new();
            map.insert("result".to_string(), other);
            Ok(map)
        }
        Err(e) => Err(EngineError::Execution(format!(
            "task '{}' produced unparseable output: {}",
            task_id, e
        ))),
    }
}

#[async_trait]
impl ExecutionProvider for DockerProvider {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn setup(
        &mut self,
        task: &Task,
        dependencies: Option<&TaskDependencies>,
    ) -> EngineResult<bool> {
        let container = match &self.container {
            Some(name) => name.clone(),
            None => self.start_container().await?,
        };
        if let Some(dependencies) = dependencies {
            self.install_packages(&container, task, dependencies).await?;
        }
        Ok(true)
    }

    async fn execute_code(
        &self,
        task: &Task,
        inputs: &ValueMap,
        environment: &HashMap<String, Value>,
    ) -> EngineResult<ValueMap> {
        let container = self.container.as_deref().ok_or_else(|| {
            EngineError::Execution(format!(
                "no container allocated for task '{}'; setup was not called",
                task.id
            ))
        })?;
        let interpreter = interpreter_for(task)?;
        let code = task
            .code
            .as_deref()
            .ok_or_else(|| EngineError::MissingCode(task.id.clone()))?;
        let source = wrap_source(&interpreter, code);

        let inputs_json = serde_json::to_string(&Value::Object(inputs.clone()))
            .map_err(|e| EngineError::Execution(format!("cannot serialize inputs: {}", e)))?;
        let env_object: ValueMap = environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let env_json = serde_json::to_string(&Value::Object(env_object))
            .map_err(|e| EngineError::Execution(format!("cannot serialize environment: {}", e)))?;

        let inputs_env = format!("CAPRUN_INPUTS={}", inputs_json);
        let environment_env = format!("CAPRUN_ENVIRONMENT={}", env_json);
        let mut args: Vec<&str> = vec![
            "exec",
            "-e",
            inputs_env.as_str(),
            "-e",
            environment_env.as_str(),
            container,
        ];
        match interpreter {
            Interpreter::Node => args.extend_from_slice(&["node", "-e", source.as_str()]),
            Interpreter::Python => args.extend_from_slice(&["python3", "-c", source.as_str()]),
        }
        let stdout = self.docker(&args).await?;
        parse_output(&stdout, &task.id)
    }

    async fn cleanup(&mut self) -> EngineResult<bool> {
        match self.container.take() {
            Some(name) => {
                self.docker(&["rm", "-f", &name]).await?;
                log::debug!("removed container '{}'", name);
                Ok(true)
            }
            // Nothing was allocated; cleanup without setup is fine.
            None => Ok(true),
        }
    }
}
