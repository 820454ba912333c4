// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod forms;
mod ingest;
mod intent;
mod llm;
mod models;
mod rag;
mod vector_store;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::{AppConfig, StartupMode};
use crate::llm::{ChatModel, Embedder, LlmManager};

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        error!("Error fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let mode = StartupMode::from_args(std::env::args().skip(1));

    // 2. Cargar configuración (falta de credenciales = error fatal)
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Inicializar gestor de LLMs
    let llm_manager =
        Arc::new(LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?);
    let embedder: Arc<dyn Embedder> = llm_manager.clone();
    let chat: Arc<dyn ChatModel> = llm_manager;

    // 4. Construir (o cargar) la base de conocimiento antes de aceptar peticiones
    let retriever = rag::build_knowledge_base(&cfg, embedder, mode.force_rebuild)
        .await
        .context("Error construyendo la base de conocimiento")?;
    if mode.build_only {
        info!("✔ Base de conocimiento lista ({} chunks).", retriever.index().len());
        return Ok(());
    }

    // 5. Crear estado compartido de la aplicación
    let composer = rag::AnswerComposer::new(chat, cfg.llm_temperature);
    let app_state = AppState::new(cfg, retriever, composer);
    let server_addr = app_state.config.server_addr.clone();
    let open_browser = app_state.config.open_browser;

    // 6. Router de la API + página estática
    let app = api::build_app(app_state);

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    if open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
