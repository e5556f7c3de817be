//! Backend selection.
//!
//! Maps a backend name to a constructor, case-insensitively. Selection is a
//! registration map rather than a hardcoded switch so embedders can add
//! variants without touching the engine; construction itself may fail (the
//! remote-workflow backend requires a credential at construction time).

use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::providers::{DockerProvider, ExecutionProvider, LocalProvider, WindmillProvider};

type Constructor = Box<dyn Fn(&EngineConfig) -> EngineResult<Box<dyn ExecutionProvider>> + Send + Sync>;

pub struct ProviderFactory {
    constructors: HashMap<String, Constructor>,
}

fn local_ctor(_config: &EngineConfig) -> EngineResult<Box<dyn ExecutionProvider>> {
    Ok(Box::new(LocalProvider::new()))
}

fn docker_ctor(config: &EngineConfig) -> EngineResult<Box<dyn ExecutionProvider>> {
    Ok(Box::new(DockerProvider::new(config.docker.clone())))
}

fn windmill_ctor(config: &EngineConfig) -> EngineResult<Box<dyn ExecutionProvider>> {
    Ok(Box::new(WindmillProvider::new(
        &config.windmill,
        config.execution.timeout_ms,
    )?))
}

impl ProviderFactory {
    /// An empty factory with no registered backends.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// The factory with the three built-in backends and their aliases.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register("local", local_ctor);
        factory.register("docker", docker_ctor);
        factory.register("containerized", docker_ctor);
        factory.register("windmill", windmill_ctor);
        factory.register("remote-workflow", windmill_ctor);
        factory
    }

    /// Register a backend constructor under a name. Later registrations
    /// replace earlier ones, so embedders can override the built-ins.
    pub fn register(
        &mut self,
        name: &str,
        constructor: impl Fn(&EngineConfig) -> EngineResult<Box<dyn ExecutionProvider>>
            + Send
            + Sync
            + 'static,
    ) {
        self.constructors
            .insert(name.to_ascii_lowercase(), Box::new(constructor));
    }

    /// Instantiate the backend registered under `name` (case-insensitive).
    pub fn get_provider(
        &self,
        name: &str,
        config: &EngineConfig,
    ) -> EngineResult<Box<dyn ExecutionProvider>> {
        match self.constructors.get(&name.to_ascii_lowercase()) {
            Some(constructor) => constructor(config),
            None => Err(EngineError::UnsupportedEnvironment(name.to_string())),
        }
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_covers_aliases() {
        let factory = ProviderFactory::with_defaults();
        let config = EngineConfig::default();

        for name in ["local", "LOCAL", "Docker", "CONTAINERIZED"] {
            assert!(factory.get_provider(name, &config).is_ok(), "name {}", name);
        }
    }

    #[test]
    fn unknown_backend_is_unsupported() {
        let factory = ProviderFactory::with_defaults();
        let err = factory
            .get_provider("lambda", &EngineConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "UnsupportedEnvironment");
        assert!(err.to_string().contains("lambda"));
    }

    #[test]
    fn construction_failures_surface_through_the_factory() {
        let factory = ProviderFactory::with_defaults();
        // Default config carries no windmill token.
        let err = factory
            .get_provider("remote-workflow", &EngineConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "MissingCredential");
    }

    #[test]
    fn registration_replaces_and_extends() {
        let mut factory = ProviderFactory::with_defaults();
        factory.register("Embedded", local_ctor);
        let config = EngineConfig::default();
        assert!(factory.get_provider("embedded", &config).is_ok());

        // Overriding a built-in name is allowed.
        factory.register("docker", local_ctor);
        let provider = factory.get_provider("docker", &config).unwrap();
        assert_eq!(provider.name(), "local");
    }
}
