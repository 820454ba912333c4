//! Consulta RAG sobre el índice vectorial del SRB.
//!
//! Flujo:
//!   1. `build_knowledge_base` carga el índice persistido o lo reconstruye desde el PDF.
//!   2. `Retriever` calcula el embedding de la consulta y recupera los `top_k` chunks.
//!   3. `AnswerComposer` rellena la plantilla fija y pregunta al LLM.

use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    ingest::{self, IngestionSummary, SplitterConfig},
    llm::{ChatModel, Embedder},
    models::{IndexedChunk, PageRecord, ScoredChunk},
    vector_store::{self, IndexExpectations, IndexManifest, LoadOutcome, VectorIndex},
};

/// Respuesta fija cuando el modelo no devuelve nada útil.
pub const REFUSAL: &str = "I’m sorry, the Student Resource Book does not provide that information.";

const PROMPT_TEMPLATE: &str = r#"
Answer strictly using the NMIMS SRB context below.
If the information is missing, say:

“I’m sorry, the Student Resource Book does not provide that information.”

Context:
{context}

Question:
{input}
"#;

/// Recupera los chunks más cercanos a una consulta. Inmutable una vez construido.
pub struct Retriever {
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl Retriever {
    pub fn new(index: VectorIndex, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Devuelve como mucho `top_k` chunks, de mayor a menor similitud.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        self.retrieve_k(query, self.top_k).await
    }

    pub async fn retrieve_k(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let query_vec = self
            .embedder
            .embed_texts(vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No se pudo generar embedding de la consulta"))?;

        let hits = self.index.search(&query_vec, k);
        debug!(
            "Recuperados {} chunks (páginas {:?}) para '{}'",
            hits.len(),
            hits.iter().map(|h| h.chunk.page).collect::<Vec<_>>(),
            query
        );
        Ok(hits)
    }
}

/// Rellena la plantilla con el contexto recuperado y consulta al LLM.
pub struct AnswerComposer {
    chat: Arc<dyn ChatModel>,
    temperature: f64,
}

impl AnswerComposer {
    pub fn new(chat: Arc<dyn ChatModel>, temperature: f64) -> Self {
        Self { chat, temperature }
    }

    pub async fn compose(&self, question: &str, context: &[ScoredChunk]) -> Result<String> {
        let prompt = render_prompt(question, context);
        let answer = self.chat.complete(&prompt, self.temperature).await?;
        let answer = answer.trim();

        if answer.is_empty() {
            warn!("El LLM devolvió una respuesta vacía; se usa la respuesta por defecto.");
            return Ok(REFUSAL.to_string());
        }
        Ok(answer.to_string())
    }
}

fn render_prompt(question: &str, context: &[ScoredChunk]) -> String {
    let context_text = context
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    PROMPT_TEMPLATE
        .replace("{context}", &context_text)
        .replace("{input}", question)
}

/// Carga el índice persistido o, si no existe, no es válido o `force_rebuild`
/// es verdadero, lo reconstruye desde el PDF y lo persiste.
pub async fn build_knowledge_base(
    cfg: &AppConfig,
    embedder: Arc<dyn Embedder>,
    force_rebuild: bool,
) -> Result<Retriever> {
    build_knowledge_base_with(cfg, embedder, force_rebuild, || {
        ingest::load_pages(&cfg.pdf_path)
    })
    .await
}

/// Como [`build_knowledge_base`], pero las páginas salen de `load_pages`,
/// que sólo se invoca si hay que reconstruir.
async fn build_knowledge_base_with<F, Fut>(
    cfg: &AppConfig,
    embedder: Arc<dyn Embedder>,
    force_rebuild: bool,
    load_pages: F,
) -> Result<Retriever>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<PageRecord>>>,
{
    let splitter = splitter_config(cfg);

    if force_rebuild {
        info!("Reconstrucción forzada del índice.");
    } else {
        let expected = IndexExpectations {
            embedding_model: embedder.model_id(),
            splitter,
        };
        match vector_store::load_index(&cfg.index_dir, &expected).await {
            LoadOutcome::Loaded(index) => {
                info!(
                    "Índice cargado desde {} ({} chunks, build {}).",
                    cfg.index_dir.display(),
                    index.len(),
                    index.manifest().build_id
                );
                return Ok(Retriever::new(index, embedder, cfg.top_k));
            }
            LoadOutcome::Missing => {
                info!("No hay índice en {}; se construye.", cfg.index_dir.display());
            }
            LoadOutcome::Failed(reason) => {
                warn!("No se pudo reutilizar el índice ({reason}); se reconstruye.");
            }
        }
    }

    let pages = load_pages().await?;
    let (index, summary) = build_index(
        &pages,
        embedder.as_ref(),
        splitter,
        cfg.embedding_batch_size,
        &cfg.pdf_path,
    )
    .await?;
    info!("Índice construido. {summary}");

    vector_store::save_index(&cfg.index_dir, &index).await?;
    Ok(Retriever::new(index, embedder, cfg.top_k))
}

/// Trocea las páginas, calcula los embeddings por lotes y crea el índice.
pub async fn build_index(
    pages: &[PageRecord],
    embedder: &dyn Embedder,
    splitter: SplitterConfig,
    batch_size: usize,
    source: &std::path::Path,
) -> Result<(VectorIndex, IngestionSummary)> {
    let chunks = ingest::split_pages(pages, splitter);
    if chunks.is_empty() {
        return Err(anyhow!(
            "El documento {} no produjo ningún chunk; no se puede construir el índice",
            source.display()
        ));
    }

    let mut summary = IngestionSummary {
        pages_loaded: pages.len(),
        chunks_created: chunks.len(),
        ..IngestionSummary::default()
    };

    let mut entries = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts = batch.iter().map(|c| c.text.clone()).collect();
        let batch_number = summary.embedding_batches + 1;
        let vectors = embedder
            .embed_texts(texts)
            .await
            .with_context(|| format!("Error calculando embeddings del lote {batch_number}"))?;
        if vectors.len() != batch.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de chunks ({})",
                vectors.len(),
                batch.len()
            ));
        }
        summary.embedding_batches += 1;
        entries.extend(
            batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, embedding)| IndexedChunk { chunk, embedding }),
        );
    }

    summary.dimensions = entries.first().map_or(0, |e| e.embedding.len());
    let manifest = IndexManifest::new(source, embedder.model_id(), summary.dimensions, splitter);
    let index = VectorIndex::new(manifest, entries)?;
    Ok((index, summary))
}

fn splitter_config(cfg: &AppConfig) -> SplitterConfig {
    SplitterConfig {
        chunk_size: cfg.chunk_size,
        chunk_overlap: cfg.chunk_overlap,
    }
}
