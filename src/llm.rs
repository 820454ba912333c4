//! Abstracción sobre Rig para embeddings y chat con distintos proveedores.
//!
//! El resto de la aplicación sólo ve los traits [`Embedder`] y [`ChatModel`];
//! [`LlmManager`] es la implementación real, configurada una única vez.

use crate::config::{AppConfig, LlmProvider};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts

/// Genera embeddings. Debe usarse el mismo modelo para construir el índice y
/// para las consultas.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Un vector por texto, en el mismo orden.
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>>;

    /// Identificador del modelo; se guarda en el manifiesto del índice.
    fn model_id(&self) -> &str;
}

/// Modelo de chat alojado que responde a un prompt ya renderizado.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f64) -> Result<String>;
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        if !cfg.embedding_provider.supports_embeddings() {
            return Err(anyhow!(
                "Proveedor {:?} no soporta embeddings",
                cfg.embedding_provider
            ));
        }
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_provider: cfg.embedding_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::client::EmbeddingsClient as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let embedding_model = client.embedding_model(&self.embedding_model);

        let expected = texts.len();
        let embeddings = embedding_model.embed_texts(texts).await?;

        if embeddings.len() != expected {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                expected
            ));
        }

        Ok(embeddings.into_iter().map(|emb| emb.vec).collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn complete_with_groq(&self, prompt: &str, temperature: f64) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::groq;

        let client = groq::Client::from_env();
        let agent = client
            .agent(&self.chat_model)
            .temperature(temperature)
            .build();

        Ok(agent.prompt(prompt).await?)
    }

    async fn complete_with_openai(&self, prompt: &str, temperature: f64) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let agent = client
            .agent(&self.chat_model)
            .temperature(temperature)
            .build();

        Ok(agent.prompt(prompt).await?)
    }
}

#[async_trait]
impl Embedder for LlmManager {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        match self.embedding_provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} no implementado para embeddings",
                other
            )),
        }
    }

    fn model_id(&self) -> &str {
        &self.embedding_model
    }
}

#[async_trait]
impl ChatModel for LlmManager {
    async fn complete(&self, prompt: &str, temperature: f64) -> Result<String> {
        match self.provider {
            LlmProvider::Groq => self.complete_with_groq(prompt, temperature).await,
            LlmProvider::OpenAI => self.complete_with_openai(prompt, temperature).await,
        }
    }
}
