//! Builds every configured chat model and embedder around one shared concatenator.

use std::sync::Arc;

use config::{Config, ProviderType};
use indexmap::IndexMap;
use schema::{ConcatRegistry, Concatenator};

use crate::{
    ChatModel, Embedder,
    callbacks::{Callbacks, ChatModelWithCallbacks},
    embedding::OpenAIEmbedder,
    error::LlmError,
    provider::{ark::ArkChatModel, gemini::GeminiChatModel, openai::OpenAIChatModel, qianfan::QianfanChatModel},
};

/// The models and embedders of one configuration.
pub struct Components {
    chat_models: IndexMap<String, Arc<dyn ChatModel>>,
    embedders: IndexMap<String, Arc<dyn Embedder>>,
    concatenator: Concatenator,
}

impl Components {
    /// Registers the Extra merge functions of every configured provider type, freezes them into
    /// one [`Concatenator`] and then constructs the providers.
    pub fn from_config(config: &Config, callbacks: Callbacks) -> crate::Result<Self> {
        Self::with_concatenator(config, Self::concatenator_for(config), callbacks)
    }

    /// A concatenator carrying the Extra merge functions of every provider type in `config`.
    ///
    /// Build it once when callbacks need the same merge rules as the models.
    pub fn concatenator_for(config: &Config) -> Concatenator {
        let mut registry = ConcatRegistry::new();

        for provider in config.providers.values() {
            match provider.provider_type() {
                ProviderType::Openai => OpenAIChatModel::register_extras(&mut registry),
                ProviderType::Ark => ArkChatModel::register_extras(&mut registry),
                ProviderType::Qianfan => QianfanChatModel::register_extras(&mut registry),
                ProviderType::Gemini => GeminiChatModel::register_extras(&mut registry),
            }
        }

        Concatenator::new(registry)
    }

    /// Constructs the providers around `concatenator`, which must come from
    /// [`Components::concatenator_for`] on the same configuration.
    pub fn with_concatenator(config: &Config, concatenator: Concatenator, callbacks: Callbacks) -> crate::Result<Self> {
        log::debug!("Initializing {} providers", config.providers.len());

        let mut chat_models = IndexMap::with_capacity(config.providers.len());
        let mut embedders = IndexMap::new();

        for (name, provider) in &config.providers {
            log::debug!("Initializing provider: {name}");

            let api = provider.api();

            let model = match provider.provider_type() {
                ProviderType::Openai => wrap(OpenAIChatModel::new(name, api)?, &callbacks),
                ProviderType::Ark => wrap(ArkChatModel::new(name, api, concatenator.clone())?, &callbacks),
                ProviderType::Qianfan => wrap(QianfanChatModel::new(name, api)?, &callbacks),
                ProviderType::Gemini => wrap(GeminiChatModel::new(name, api)?, &callbacks),
            };

            chat_models.insert(name.clone(), model);

            if let Some(embedder) = OpenAIEmbedder::from_config(name, provider.provider_type(), api)? {
                embedders.insert(name.clone(), Arc::new(embedder) as Arc<dyn Embedder>);
            }
        }

        log::debug!(
            "Initialized {} chat models and {} embedders",
            chat_models.len(),
            embedders.len()
        );

        Ok(Self {
            chat_models,
            embedders,
            concatenator,
        })
    }

    pub fn chat_model(&self, name: &str) -> crate::Result<Arc<dyn ChatModel>> {
        self.chat_models
            .get(name)
            .cloned()
            .ok_or_else(|| LlmError::ProviderNotFound(name.to_string()))
    }

    pub fn embedder(&self, name: &str) -> crate::Result<Arc<dyn Embedder>> {
        self.embedders
            .get(name)
            .cloned()
            .ok_or_else(|| LlmError::ProviderNotFound(name.to_string()))
    }

    /// Provider names in configuration order.
    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.chat_models.keys().map(String::as_str)
    }

    /// Concatenator carrying the merge functions of every configured provider.
    pub fn concatenator(&self) -> &Concatenator {
        &self.concatenator
    }
}

fn wrap<M: ChatModel + 'static>(model: M, callbacks: &Callbacks) -> Arc<dyn ChatModel> {
    if callbacks.is_empty() {
        Arc::new(model)
    } else {
        Arc::new(ChatModelWithCallbacks::new(model, callbacks.clone()))
    }
}

impl std::fmt::Debug for Components {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Components")
            .field("chat_models", &self.chat_models.keys().collect::<Vec<_>>())
            .field("embedders", &self.embedders.keys().collect::<Vec<_>>())
            .field("concatenator", &self.concatenator)
            .finish()
    }
}
