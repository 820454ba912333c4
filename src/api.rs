use axum::{
    body::Body,
    extract::{Json, Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceExt;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::{
    app_state::{AppState, Status},
    intent::{self, ChatReply, Route},
};

const FORM_NOT_FOUND: &str = "Form not found.";
const SNIPPET_CHARS: usize = 400;

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    input: String,
}

#[derive(Deserialize)]
pub struct DebugRetrieveParams {
    q: String,
    top_k: Option<usize>,
}

#[derive(Serialize)]
pub struct DebugHit {
    rank: usize,
    page: usize,
    chunk_index: usize,
    score: f64,
    text_snippet: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    let mut router = Router::new()
        .route("/chat", post(chat_handler))
        .route("/download_form/:form_name", get(download_form_handler))
        .route("/api/status", get(status_handler));

    if app_state.config.debug_routes {
        router = router.route("/api/debug/retrieve", get(debug_retrieve_handler));
    }

    router.with_state(app_state)
}

/// Aplicación completa: API + página estática en `/`.
pub fn build_app(app_state: AppState) -> Router {
    let static_dir = app_state.config.static_dir.clone();
    Router::new()
        .merge(create_router(app_state))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// --- Handlers ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatReply>, (StatusCode, Json<serde_json::Value>)> {
    let query = match intent::route(&payload.input, &state.forms).await {
        Route::Answer(rule, reply) => {
            debug!("Respuesta fija por la regla {:?}", rule);
            return Ok(Json(reply));
        }
        Route::Retrieve(query) => query,
    };

    let answer = async {
        let context = state.retriever.retrieve(&query).await?;
        state.composer.compose(&query, &context).await
    }
    .await;

    match answer {
        Ok(answer) => Ok(Json(ChatReply::text(answer))),
        Err(e) => {
            error!("Error en la consulta RAG '{}': {:#}", query, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("Error al procesar la consulta RAG: {}", e)})),
            ))
        }
    }
}

#[axum::debug_handler]
async fn download_form_handler(
    State(state): State<AppState>,
    Path(form_name): Path<String>,
    request: Request,
) -> Response {
    let form = match state.forms.resolve(&form_name).await {
        Ok(form) => form,
        Err(err) => {
            warn!("Descarga rechazada: {}", err);
            return form_not_found();
        }
    };

    let mime = mime_guess::from_path(&form.path).first_or_octet_stream();

    // ServeFile envía el fichero por streaming (sin cargarlo entero en memoria).
    let mut response = match ServeFile::new_with_mime(&form.path, &mime)
        .oneshot(request)
        .await
    {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };

    if response.status() == StatusCode::NOT_FOUND {
        error!("El fichero {} desapareció antes de servirse", form.path.display());
        return form_not_found();
    }

    let disposition = format!("attachment; filename=\"{}\"", form.filename);
    match HeaderValue::from_str(&disposition) {
        Ok(value) => {
            response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
        }
        Err(e) => warn!("Content-Disposition no válido para {}: {}", form.filename, e),
    }
    info!("Sirviendo formulario {}", form.path.display());
    response
}

fn form_not_found() -> Response {
    (StatusCode::NOT_FOUND, FORM_NOT_FOUND).into_response()
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status())
}

/// Muestra qué chunks se recuperan para una consulta (sólo con `DEBUG_ROUTES`).
#[axum::debug_handler]
async fn debug_retrieve_handler(
    State(state): State<AppState>,
    Query(params): Query<DebugRetrieveParams>,
) -> Result<Json<Vec<DebugHit>>, (StatusCode, Json<serde_json::Value>)> {
    let k = params.top_k.unwrap_or_else(|| state.retriever.top_k());
    let hits = state.retriever.retrieve_k(&params.q, k).await.map_err(|e| {
        error!("Error en la recuperación de depuración: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("Error al recuperar chunks: {}", e)})),
        )
    })?;

    let hits = hits
        .into_iter()
        .enumerate()
        .map(|(i, hit)| DebugHit {
            rank: i + 1,
            page: hit.chunk.page,
            chunk_index: hit.chunk.chunk_index,
            score: hit.score,
            text_snippet: hit
                .chunk
                .text
                .chars()
                .take(SNIPPET_CHARS)
                .map(|c| if c == '\n' { ' ' } else { c })
                .collect(),
        })
        .collect();
    Ok(Json(hits))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::Path as FsPath, sync::Arc};

    use http_body_util::BodyExt;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::AppConfig,
        ingest::{self, SplitterConfig},
        llm::testing::{HashEmbedder, ScriptedChat},
        rag::{self, AnswerComposer, Retriever, REFUSAL},
    };

    struct Fixture {
        _dir: TempDir,
        app: Router,
        chat: Arc<ScriptedChat>,
    }

    async fn fixture(chat: ScriptedChat, debug_routes: bool, forms: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let forms_dir = dir.path().join("forms");
        let static_dir = dir.path().join("frontend");
        std::fs::create_dir_all(&forms_dir).unwrap();
        std::fs::create_dir_all(&static_dir).unwrap();
        std::fs::write(static_dir.join("index.html"), "<h1>SRB Assistant</h1>").unwrap();
        for file in forms {
            std::fs::write(forms_dir.join(file), b"DOC-BYTES").unwrap();
        }

        let vars: HashMap<&str, String> = [
            ("GROQ_API_KEY", "gsk-test".to_string()),
            ("OPENAI_API_KEY", "sk-test".to_string()),
            ("FORMS_DIR", forms_dir.display().to_string()),
            ("STATIC_DIR", static_dir.display().to_string()),
            ("DEBUG_ROUTES", debug_routes.to_string()),
            ("RETRIEVAL_TOP_K", "2".to_string()),
        ]
        .into();
        let cfg = AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

        let pages = ingest::pages_from_text(vec![
            "Attendance of 80 percent is mandatory for every course.".to_string(),
            "The library is open from 8 am to 10 pm on working days.".to_string(),
            "Hostel fees are payable at the start of each semester.".to_string(),
        ]);
        let embedder = Arc::new(HashEmbedder::default());
        let splitter = SplitterConfig {
            chunk_size: cfg.chunk_size,
            chunk_overlap: cfg.chunk_overlap,
        };
        let source = FsPath::new("SRB.pdf");
        let (index, _) = rag::build_index(&pages, embedder.as_ref(), splitter, 8, source)
            .await
            .unwrap();

        let chat = Arc::new(chat);
        let retriever = Retriever::new(index, embedder, cfg.top_k);
        let composer = AnswerComposer::new(chat.clone(), cfg.llm_temperature);
        let app = build_app(AppState::new(cfg, retriever, composer));
        Fixture {
            _dir: dir,
            app,
            chat,
        }
    }

    fn chat_request(input: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "input": input }).to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        resp.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(resp).await).unwrap()
    }

    #[tokio::test]
    async fn greeting_is_answered_without_the_llm() {
        let fx = fixture(ScriptedChat::replying("unused"), false, &[]).await;
        let resp = fx.app.oneshot(chat_request("Hey there")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json, json!({"answer": intent::GREETING}));
        assert!(fx.chat.last_prompt().is_none());
    }

    #[tokio::test]
    async fn missing_input_field_is_treated_as_empty() {
        let fx = fixture(ScriptedChat::replying("unused"), false, &[]).await;
        let req = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let json = body_json(fx.app.oneshot(req).await.unwrap()).await;
        assert_eq!(json["answer"], intent::EMPTY_PROMPT);
    }

    #[tokio::test]
    async fn grading_question_returns_the_table() {
        let fx = fixture(ScriptedChat::replying("unused"), false, &[]).await;
        let json = body_json(fx.app.oneshot(chat_request("CGPA scale?")).await.unwrap()).await;
        assert_eq!(json["answer"], intent::GRADE_TABLE);
    }

    #[tokio::test]
    async fn other_questions_go_through_rag() {
        let fx = fixture(ScriptedChat::replying("The library opens at 8 am."), false, &[]).await;
        let resp = fx
            .app
            .oneshot(chat_request("When does the library open?"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"answer": "The library opens at 8 am."}));

        let (prompt, _) = fx.chat.last_prompt().unwrap();
        assert!(prompt.contains("The library is open from 8 am to 10 pm on working days."));
        assert!(prompt.contains("when does the library open?"));
    }

    #[tokio::test]
    async fn empty_model_answer_becomes_the_refusal() {
        let fx = fixture(ScriptedChat::replying(""), false, &[]).await;
        let json = body_json(fx.app.oneshot(chat_request("hostel fees")).await.unwrap()).await;
        assert_eq!(json["answer"], REFUSAL);
    }

    #[tokio::test]
    async fn llm_failure_is_a_server_error() {
        let fx = fixture(ScriptedChat::failing(), false, &[]).await;
        let resp = fx.app.oneshot(chat_request("hostel fees")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn form_question_links_to_the_download() {
        let forms = ["migration_certificate.doc"];
        let fx = fixture(ScriptedChat::replying("unused"), false, &forms).await;
        let json = body_json(
            fx.app
                .oneshot(chat_request("What is the migration form?"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(
            json,
            json!({
                "answer": "Here is your **Migration Form**:",
                "download_link": "/download_form/migration"
            })
        );
    }

    #[tokio::test]
    async fn form_question_reports_missing_file() {
        let fx = fixture(ScriptedChat::replying("unused"), false, &[]).await;
        let json = body_json(
            fx.app
                .oneshot(chat_request("What is the migration form?"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(json, json!({"answer": "Migration form is missing."}));
    }

    #[tokio::test]
    async fn unknown_form_download_is_404() {
        let fx = fixture(ScriptedChat::replying("unused"), false, &[]).await;
        let resp = fx.app.oneshot(get("/download_form/unknown_xyz")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_bytes(resp).await, b"Form not found.");
    }

    #[tokio::test]
    async fn missing_form_file_download_is_also_404() {
        let fx = fixture(ScriptedChat::replying("unused"), false, &[]).await;
        let resp = fx.app.oneshot(get("/download_form/absence")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_bytes(resp).await, b"Form not found.");
    }

    #[tokio::test]
    async fn existing_form_is_sent_as_attachment() {
        let forms = ["clearance_certificate.doc"];
        let fx = fixture(ScriptedChat::replying("unused"), false, &forms).await;
        let resp = fx.app.oneshot(get("/download_form/Clearance")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"clearance_certificate.doc\""
        );
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/msword");
        assert_eq!(body_bytes(resp).await, b"DOC-BYTES");
    }

    #[tokio::test]
    async fn form_download_honours_byte_ranges() {
        let forms = ["clearance_certificate.doc"];
        let fx = fixture(ScriptedChat::replying("unused"), false, &forms).await;
        let req = Request::builder()
            .uri("/download_form/clearance")
            .header(header::RANGE, "bytes=0-2")
            .body(Body::empty())
            .unwrap();
        let resp = fx.app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"clearance_certificate.doc\""
        );
        assert_eq!(body_bytes(resp).await, b"DOC");
    }

    #[tokio::test]
    async fn form_name_with_trailing_space_is_404() {
        let forms = ["migration_certificate.doc"];
        let fx = fixture(ScriptedChat::replying("unused"), false, &forms).await;
        let resp = fx.app.oneshot(get("/download_form/migration%20")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_bytes(resp).await, b"Form not found.");
    }

    #[tokio::test]
    async fn landing_page_is_served_at_root() {
        let fx = fixture(ScriptedChat::replying("unused"), false, &[]).await;
        let resp = fx.app.oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, b"<h1>SRB Assistant</h1>");
    }

    #[tokio::test]
    async fn status_reports_the_index() {
        let fx = fixture(ScriptedChat::replying("unused"), false, &[]).await;
        let json = body_json(fx.app.oneshot(get("/api/status")).await.unwrap()).await;
        assert_eq!(json["chunks"], 3);
        assert_eq!(json["top_k"], 2);
        assert_eq!(json["embedding_model"], "hash-embedder");
    }

    #[tokio::test]
    async fn debug_route_is_hidden_unless_enabled() {
        let fx = fixture(ScriptedChat::replying("unused"), false, &[]).await;
        let resp = fx.app.oneshot(get("/api/debug/retrieve?q=library")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn debug_route_ranks_chunks() {
        let fx = fixture(ScriptedChat::replying("unused"), true, &[]).await;
        let resp = fx
            .app
            .oneshot(get("/api/debug/retrieve?q=library%20open%20working%20days&top_k=3"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let hits = json.as_array().unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0]["rank"], 1);
        assert_eq!(hits[0]["page"], 2);
    }
}
