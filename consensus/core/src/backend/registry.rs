//! Client Registry
//!
//! Maps every [`ModelIdentity`] the pipeline may dispatch to the client
//! instance that serves it, plus the model name that client expects on the
//! wire. Built once at pipeline construction; lookups never consult
//! global state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::ollama::OllamaClient;
use super::openai::OpenAiCompatibleClient;
use super::traits::ModelClient;
use crate::config::{BackendSettings, ConfigError, ConsensusConfig};
use crate::model::ModelIdentity;

/// A client plus the wire name to use for one model
#[derive(Clone)]
pub struct ClientBinding {
    /// Client instance (shared between models on the same backend)
    pub client: Arc<dyn ModelClient>,
    /// Model name sent to the backend
    pub wire_model: String,
}

impl std::fmt::Debug for ClientBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBinding")
            .field("provider", &self.client.provider())
            .field("wire_model", &self.wire_model)
            .finish()
    }
}

/// Identity -> client mapping
#[derive(Clone, Debug, Default)]
pub struct ClientRegistry {
    bindings: HashMap<ModelIdentity, ClientBinding>,
}

impl ClientRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model; `wire_model` defaults to the identity string
    ///
    /// Registering the same identity twice replaces the earlier binding.
    pub fn register(
        &mut self,
        model: ModelIdentity,
        client: Arc<dyn ModelClient>,
        wire_model: Option<String>,
    ) {
        let wire_model = wire_model.unwrap_or_else(|| model.as_str().to_string());
        self.bindings
            .insert(model, ClientBinding { client, wire_model });
    }

    /// Builder-style [`Self::register`]
    #[must_use]
    pub fn with(mut self, model: ModelIdentity, client: Arc<dyn ModelClient>) -> Self {
        self.register(model, client, None);
        self
    }

    /// Look up the binding for a model
    #[must_use]
    pub fn get(&self, model: &ModelIdentity) -> Option<&ClientBinding> {
        self.bindings.get(model)
    }

    /// True if the model has a client
    #[must_use]
    pub fn contains(&self, model: &ModelIdentity) -> bool {
        self.bindings.contains_key(model)
    }

    /// Registered models, sorted
    #[must_use]
    pub fn models(&self) -> Vec<ModelIdentity> {
        let mut models: Vec<_> = self.bindings.keys().cloned().collect();
        models.sort();
        models
    }

    /// Number of registered models
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Build the registry described by a configuration
    ///
    /// One client is created per declared backend and shared by every model
    /// that names it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a model names an undeclared
    /// backend or a client cannot be constructed.
    pub fn from_config(config: &ConsensusConfig) -> Result<Self, ConfigError> {
        let mut clients: BTreeMap<&str, Arc<dyn ModelClient>> = BTreeMap::new();
        for (name, settings) in &config.backends {
            let client: Arc<dyn ModelClient> = match settings {
                BackendSettings::OpenAiCompatible {
                    base_url,
                    api_key,
                    connect_timeout,
                    ..
                } => Arc::new(
                    OpenAiCompatibleClient::new(
                        name.clone(),
                        base_url.clone(),
                        api_key.clone(),
                        *connect_timeout,
                    )
                    .map_err(|e| ConfigError::Validation(format!("backend {name}: {e}")))?,
                ),
                BackendSettings::Ollama { host, port } => Arc::new(
                    OllamaClient::new(host.clone(), *port)
                        .map_err(|e| ConfigError::Validation(format!("backend {name}: {e}")))?,
                ),
            };
            clients.insert(name.as_str(), client);
        }

        let mut registry = Self::new();
        for entry in &config.models {
            let client = clients.get(entry.backend.as_str()).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "model {} references unknown backend {:?}",
                    entry.id, entry.backend
                ))
            })?;
            registry.register(entry.id.clone(), Arc::clone(client), entry.wire_name.clone());
        }

        tracing::debug!(
            backends = clients.len(),
            models = registry.len(),
            "Client registry built"
        );

        Ok(registry)
    }
}
