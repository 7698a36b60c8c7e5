//! Stored model configuration: which model to call and with what sampling
//! parameters. Unset parameters stay unset instead of carrying sentinel
//! values; the model adapter omits them from the request.

use crate::error::CoreError;
use crate::ids::ModelConfigId;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    id: ModelConfigId,
    model: String,
    system_message: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    stop_words: Vec<String>,
}

impl ModelSettings {
    pub fn new(id: ModelConfigId, model: impl Into<String>) -> Result<Self, CoreError> {
        let model = model.into();
        if model.is_empty() {
            return Err(CoreError::validation("model name is required"));
        }

        Ok(Self {
            id,
            model,
            system_message: String::new(),
            temperature: None,
            top_p: None,
            stop_words: Vec::new(),
        })
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = message.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop_words(mut self, stop_words: Vec<String>) -> Self {
        self.stop_words = stop_words;
        self
    }

    pub fn id(&self) -> ModelConfigId {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_message(&self) -> &str {
        &self.system_message
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    pub fn top_p(&self) -> Option<f32> {
        self.top_p
    }

    pub fn stop_words(&self) -> &[String] {
        &self.stop_words
    }
}
