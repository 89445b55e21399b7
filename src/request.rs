use serde::Serialize;

use crate::config::ModelConfig;
use crate::schema::Schema;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Sampling parameters forwarded to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelParams {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelParams {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            model_name: config.name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

impl Default for ModelParams {
    fn default() -> Self {
        Self::from_config(&ModelConfig::default())
    }
}

/// An immutable description of one call to the model.
///
/// Built through [`Request::builder`]; once built it cannot be mutated, so a
/// request and its fingerprint always agree. Use
/// [`GatewayClient::request`](crate::GatewayClient::request) to start from the
/// configured `[model]` parameters instead of the built-in ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    prompt: String,
    system_instructions: Option<String>,
    model_params: ModelParams,
    schema: Option<Schema>,
    is_list: bool,
    namespace: String,
}

impl Request {
    pub fn builder(prompt: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            prompt: prompt.into(),
            system_instructions: None,
            model_params: None,
            temperature: None,
            max_tokens: None,
            schema: None,
            is_list: false,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn system_instructions(&self) -> Option<&str> {
        self.system_instructions.as_deref()
    }

    pub fn model_params(&self) -> &ModelParams {
        &self.model_params
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn is_list(&self) -> bool {
        self.is_list
    }

    /// Business area the request belongs to; prefixes the cache key.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Free-text calls skip structured parsing entirely.
    pub fn is_free_text(&self) -> bool {
        self.schema.is_none() && !self.is_list
    }

    pub(crate) fn into_list(mut self) -> Self {
        self.is_list = true;
        self
    }
}

pub struct RequestBuilder {
    prompt: String,
    system_instructions: Option<String>,
    model_params: Option<ModelParams>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    schema: Option<Schema>,
    is_list: bool,
    namespace: String,
}

impl RequestBuilder {
    pub fn system(mut self, instructions: impl Into<String>) -> Self {
        self.system_instructions = Some(instructions.into());
        self
    }

    pub fn model_params(mut self, params: ModelParams) -> Self {
        self.model_params = Some(params);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Expected shape of the output, or of each item for list requests.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn list(mut self) -> Self {
        self.is_list = true;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Build with the built-in [`ModelParams::default`] for any model parameter
    /// not set explicitly. The `[model]` section of a loaded config is not
    /// consulted; [`GatewayClient::request`](crate::GatewayClient::request)
    /// returns a builder that applies it.
    pub fn build(self) -> Request {
        self.build_with_defaults(&ModelParams::default())
    }

    /// Build using the given defaults for any model parameter not set explicitly.
    pub fn build_with_defaults(self, defaults: &ModelParams) -> Request {
        let mut model_params = self.model_params.unwrap_or_else(|| defaults.clone());
        if let Some(temperature) = self.temperature {
            model_params.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            model_params.max_tokens = max_tokens;
        }

        Request {
            prompt: self.prompt,
            system_instructions: self.system_instructions,
            model_params,
            schema: self.schema,
            is_list: self.is_list,
            namespace: self.namespace,
        }
    }
}
