//! Carga y gestión de configuración de la aplicación (documento SRB, índice y LLM).

use anyhow::{anyhow, bail, Result};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    Groq,
    OpenAI,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Variable de entorno con la credencial del proveedor.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
        }
    }

    /// Groq no ofrece un endpoint de embeddings estable.
    pub fn supports_embeddings(&self) -> bool {
        matches!(self, Self::OpenAI)
    }

    fn default_chat_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::OpenAI => "gpt-4o-mini",
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub pdf_path: PathBuf,
    pub forms_dir: PathBuf,
    pub index_dir: PathBuf,
    pub static_dir: PathBuf,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    pub llm_temperature: f64,
    pub embedding_provider: LlmProvider,
    pub llm_embedding_model: String,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embedding_batch_size: usize,

    pub debug_routes: bool,
    pub open_browser: bool,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de claves.
    /// Una credencial ausente es un error de configuración y aborta el arranque.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = get("BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(&get, "PORT", 5000)?;
        let server_addr = format!("{host}:{port}");

        let llm_provider =
            LlmProvider::from_str(&get("LLM_PROVIDER").unwrap_or_else(|| "groq".to_string()))?;
        let llm_chat_model = get("LLM_CHAT_MODEL")
            .unwrap_or_else(|| llm_provider.default_chat_model().to_string());
        let llm_temperature: f64 = parse_or(&get, "LLM_TEMPERATURE", 0.2)?;
        if !(0.0..=2.0).contains(&llm_temperature) {
            bail!("LLM_TEMPERATURE fuera de rango (0.0 - 2.0): {llm_temperature}");
        }

        let embedding_provider = LlmProvider::from_str(
            &get("EMBEDDING_PROVIDER").unwrap_or_else(|| "openai".to_string()),
        )?;
        if !embedding_provider.supports_embeddings() {
            bail!("El proveedor {embedding_provider:?} no soporta embeddings");
        }
        let llm_embedding_model = get("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|| "text-embedding-3-small".to_string());

        for provider in [&llm_provider, &embedding_provider] {
            let var = provider.api_key_var();
            if get(var).is_none() {
                bail!("Falta {var} en el entorno");
            }
        }

        let chunk_size: usize = parse_or(&get, "CHUNK_SIZE", 1000)?;
        let chunk_overlap: usize = parse_or(&get, "CHUNK_OVERLAP", 400)?;
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            bail!("CHUNK_OVERLAP ({chunk_overlap}) debe ser menor que CHUNK_SIZE ({chunk_size})");
        }

        let top_k: usize = parse_or(&get, "RETRIEVAL_TOP_K", 6)?;
        let embedding_batch_size: usize = parse_or(&get, "EMBEDDING_BATCH_SIZE", 64)?;
        if top_k == 0 || embedding_batch_size == 0 {
            bail!("RETRIEVAL_TOP_K y EMBEDDING_BATCH_SIZE deben ser mayores que cero");
        }

        let path = |key: &str, default: &str| {
            PathBuf::from(get(key).unwrap_or_else(|| default.to_string()))
        };

        Ok(Self {
            server_addr,
            pdf_path: path("SRB_PDF_PATH", "SRB.pdf"),
            forms_dir: path("FORMS_DIR", "forms"),
            index_dir: path("INDEX_DIR", "index_store/srb_index"),
            static_dir: path("STATIC_DIR", "frontend"),
            llm_provider,
            llm_chat_model,
            llm_temperature,
            embedding_provider,
            llm_embedding_model,
            chunk_size,
            chunk_overlap,
            top_k,
            embedding_batch_size,
            debug_routes: parse_bool(&get, "DEBUG_ROUTES")?,
            open_browser: parse_bool(&get, "OPEN_BROWSER")?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}")),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("Valor booleano inválido para {key}: '{v}'")),
        },
    }
}

/// Modo de arranque según los argumentos de línea de comandos.
///
/// - `rebuild` / `force`: reconstruye el índice aunque exista uno persistido.
/// - `build` / `--build-only`: construye (o recarga) el índice y termina sin servir.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupMode {
    pub force_rebuild: bool,
    pub build_only: bool,
}

impl StartupMode {
    /// Igual que [`StartupMode::parse`], avisando de cada argumento desconocido.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (mode, unknown) = Self::parse(args);
        for arg in unknown {
            warn!(
                "Argumento desconocido ignorado: '{arg}' \
                 (válidos: rebuild, force, build, --build-only)"
            );
        }
        mode
    }

    /// Devuelve el modo y los argumentos no reconocidos.
    pub fn parse<I, S>(args: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mode = Self::default();
        let mut unknown = Vec::new();
        for arg in args {
            match arg.as_ref().to_lowercase().as_str() {
                "rebuild" | "force" => mode.force_rebuild = true,
                "build" | "--build-only" => mode.build_only = true,
                _ => unknown.push(arg.as_ref().to_string()),
            }
        }
        (mode, unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const KEYS: [(&str, &str); 2] = [("GROQ_API_KEY", "gsk-test"), ("OPENAI_API_KEY", "sk-test")];

    #[test]
    fn defaults_apply_when_only_keys_are_set() {
        let cfg = config_with(&KEYS).unwrap();
        assert_eq!(cfg.server_addr, "0.0.0.0:5000");
        assert_eq!(cfg.llm_provider, LlmProvider::Groq);
        assert_eq!(cfg.llm_chat_model, "llama-3.3-70b-versatile");
        assert_eq!(cfg.llm_embedding_model, "text-embedding-3-small");
        assert_eq!(cfg.llm_temperature, 0.2);
        assert_eq!((cfg.chunk_size, cfg.chunk_overlap), (1000, 400));
        assert_eq!(cfg.top_k, 6);
        assert_eq!(cfg.pdf_path, PathBuf::from("SRB.pdf"));
        assert_eq!(cfg.forms_dir, PathBuf::from("forms"));
        assert!(!cfg.debug_routes);
    }

    #[test]
    fn missing_groq_key_is_fatal() {
        let err = config_with(&[("OPENAI_API_KEY", "sk-test")]).unwrap_err();
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn blank_credential_counts_as_missing() {
        let err = config_with(&[("GROQ_API_KEY", "  "), ("OPENAI_API_KEY", "sk-test")])
            .unwrap_err();
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn openai_only_setup_needs_a_single_key() {
        let cfg = config_with(&[("LLM_PROVIDER", "OpenAI"), ("OPENAI_API_KEY", "sk-test")])
            .unwrap();
        assert_eq!(cfg.llm_provider, LlmProvider::OpenAI);
        assert_eq!(cfg.llm_chat_model, "gpt-4o-mini");
    }

    #[test]
    fn groq_cannot_provide_embeddings() {
        let mut vars = KEYS.to_vec();
        vars.push(("EMBEDDING_PROVIDER", "groq"));
        assert!(config_with(&vars).is_err());
    }

    #[test]
    fn port_override_and_invalid_port() {
        let mut vars = KEYS.to_vec();
        vars.push(("PORT", "8080"));
        assert_eq!(config_with(&vars).unwrap().server_addr, "0.0.0.0:8080");

        let mut vars = KEYS.to_vec();
        vars.push(("PORT", "not-a-port"));
        assert!(config_with(&vars).is_err());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut vars = KEYS.to_vec();
        vars.push(("CHUNK_SIZE", "100"));
        vars.push(("CHUNK_OVERLAP", "100"));
        assert!(config_with(&vars).is_err());
    }

    #[test]
    fn startup_mode_parses_rebuild_and_build_only() {
        assert_eq!(StartupMode::from_args(Vec::<String>::new()), StartupMode::default());
        let mode = StartupMode::from_args(["REBUILD"]);
        assert!(mode.force_rebuild && !mode.build_only);
        let mode = StartupMode::from_args(["build", "force"]);
        assert!(mode.force_rebuild && mode.build_only);
        assert_eq!(StartupMode::from_args(["serve"]), StartupMode::default());
    }

    #[test]
    fn misspelled_flag_is_reported_not_applied() {
        let (mode, unknown) = StartupMode::parse(["rebiuld"]);
        assert_eq!(mode, StartupMode::default());
        assert_eq!(unknown, vec!["rebiuld".to_string()]);

        let (mode, unknown) = StartupMode::parse(["Force", "--verbose"]);
        assert!(mode.force_rebuild);
        assert_eq!(unknown, vec!["--verbose".to_string()]);
    }
}
