//! Router de intenciones del chat por palabras clave.
//!
//! Las reglas se evalúan sobre una copia en minúsculas y sin espacios en los
//! extremos de la pregunta, en este orden estricto (gana la primera):
//!
//! 1. Entrada vacía → invitación a preguntar.
//! 2. Saludo (`hi`, `hello`, `hey` como palabra completa).
//! 3. Agradecimiento (subcadena `thank`).
//! 4. Calificaciones (`grade`, `grading`, `cgpa`, `marks`) → tabla de notas.
//! 5. Promoción (`atkt`, `promotion`, `progression`, `backlog`, `promoted`) → tabla de reglas.
//! 6. `project` / `guideline` → se amplía la consulta (no responde).
//! 7. Formularios, en el orden de [`FORMS`]: enlace de descarga o aviso de fichero ausente.
//! 8. `placement` / `internship` → se amplía la consulta (no responde).
//! 9. Cualquier otra cosa → RAG con la consulta (posiblemente ampliada).

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::forms::{title_case, FormCatalog, FORMS};

pub const EMPTY_PROMPT: &str = "Please ask a question.";
pub const GREETING: &str = "Hello! How can I assist you with the NMIMS SRB today?";
pub const THANKS: &str = "You're very welcome! 😊";

pub const GRADE_TABLE: &str = "
| Grade | Grade Points | Marks Range (%) |
|-------|-------------|----------------|
| A+    | 4.00        | 85 and above   |
| A     | 3.75        | 81 - 84.99     |
| A-    | 3.50        | 77 - 80.99     |
| B+    | 3.25        | 73 - 76.99     |
| B     | 3.00        | 69 - 72.99     |
| B-    | 2.75        | 65 - 68.99     |
| C+    | 2.50        | 61 - 64.99     |
| C     | 2.25        | 57 - 60.99     |
| C-    | 2.00        | 50 - 56.99     |
| D     | 1.50        | 40 - 49.99     |
| F     | 0.00        | below 40       |
";

pub const PROMOTION_RULES: &str = "
### Promotion / ATKT Eligibility Rules

| Allowed | Not Allowed |
|---------|-------------|
| 2F, 0D  | 3F, 0D      |
| 1F, 2D  | 2F, ≥1D     |
| 0F, 1D  | 1F, ≥3D     |
| 0F, 2D  | ≥3F, ≥1D    |
| 0F, 3D  | 4F, 0D      |

**Notes:**  
If in \"Not Allowed\", the student must clear pending courses.
";

const GRADING_KEYWORDS: [&str; 4] = ["grade", "grading", "cgpa", "marks"];
const PROMOTION_KEYWORDS: [&str; 5] = ["atkt", "promotion", "progression", "backlog", "promoted"];
const PROJECT_EXPANSION: &str = " academic project submission plagiarism rules";
const PLACEMENT_EXPANSION: &str = " placement rules internship eligibility process";

static GREETING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(hi|hello|hey)\b").expect("regex de saludo válida"));

/// Regla que resolvió la petición.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Empty,
    Greeting,
    Thanks,
    Grading,
    Promotion,
    Form,
}

/// Respuesta del endpoint de chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_link: Option<String>,
}

impl ChatReply {
    pub fn text(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            download_link: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Respuesta fija, sin pasar por el LLM.
    Answer(Rule, ChatReply),
    /// Consulta (normalizada y quizá ampliada) para el pipeline RAG.
    Retrieve(String),
}

pub async fn route(raw_input: &str, forms: &FormCatalog) -> Route {
    let mut query = raw_input.trim().to_lowercase();

    if query.is_empty() {
        return Route::Answer(Rule::Empty, ChatReply::text(EMPTY_PROMPT));
    }
    if GREETING_RE.is_match(&query) {
        return Route::Answer(Rule::Greeting, ChatReply::text(GREETING));
    }
    if query.contains("thank") {
        return Route::Answer(Rule::Thanks, ChatReply::text(THANKS));
    }
    if contains_any(&query, &GRADING_KEYWORDS) {
        return Route::Answer(Rule::Grading, ChatReply::text(GRADE_TABLE));
    }
    if contains_any(&query, &PROMOTION_KEYWORDS) {
        return Route::Answer(Rule::Promotion, ChatReply::text(PROMOTION_RULES));
    }

    if query.contains("project") || query.contains("guideline") {
        query.push_str(PROJECT_EXPANSION);
    }

    if let Some((key, _)) = FORMS.iter().find(|(key, _)| query.contains(key)) {
        let reply = match forms.resolve(key).await {
            Ok(form) => ChatReply {
                answer: format!("Here is your **{} Form**:", form.title()),
                download_link: Some(form.download_link()),
            },
            Err(err) => {
                debug!("Formulario no disponible: {err}");
                ChatReply::text(format!("{} form is missing.", title_case(key)))
            }
        };
        return Route::Answer(Rule::Form, reply);
    }

    if query.contains("placement") || query.contains("internship") {
        query.push_str(PLACEMENT_EXPANSION);
    }

    debug!("Consulta enviada al RAG: '{}'", query);
    Route::Retrieve(query)
}

fn contains_any(query: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| query.contains(k))
}
