use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    forms::FormCatalog,
    rag::{AnswerComposer, Retriever},
};

/// Contexto de la aplicación: se construye una vez al arrancar y se comparte
/// (sólo lectura) entre todas las peticiones.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub retriever: Arc<Retriever>,
    pub composer: Arc<AnswerComposer>,
    pub forms: FormCatalog,
}

impl AppState {
    pub fn new(config: AppConfig, retriever: Retriever, composer: AnswerComposer) -> Self {
        let forms = FormCatalog::new(config.forms_dir.clone());
        Self {
            config: Arc::new(config),
            retriever: Arc::new(retriever),
            composer: Arc::new(composer),
            forms,
        }
    }

    pub fn status(&self) -> Status {
        let index = self.retriever.index();
        let manifest = index.manifest();
        Status {
            message: "Servidor listo.".to_string(),
            chunks: index.len(),
            embedding_model: manifest.embedding_model.clone(),
            dimensions: manifest.dimensions,
            top_k: self.retriever.top_k(),
            chat_model: self.config.llm_chat_model.clone(),
            build_id: manifest.build_id,
            built_at: manifest.built_at,
            source: manifest.source.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub message: String,
    pub chunks: usize,
    pub embedding_model: String,
    pub dimensions: usize,
    pub top_k: usize,
    pub chat_model: String,
    pub build_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub source: String,
}
