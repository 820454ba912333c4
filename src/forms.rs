//! Catálogo fijo de formularios descargables.

use std::path::PathBuf;

use thiserror::Error;

/// Clave → nombre de fichero dentro del directorio de formularios.
/// El orden es el de evaluación en el router de chat.
pub const FORMS: [(&str, &str); 5] = [
    ("migration", "migration_certificate.doc"),
    ("exchange", "exchange_program_form.doc"),
    ("clearance", "clearance_certificate.doc"),
    ("undertaking", "undertaking_form.doc"),
    ("absence", "absence_form.doc"),
];

/// Única forma de fallo al resolver un formulario.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("formulario desconocido: '{0}'")]
    Unknown(String),

    #[error("el fichero del formulario '{key}' no existe en {}", .path.display())]
    Missing { key: &'static str, path: PathBuf },
}

/// Formulario resuelto y presente en disco.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormFile {
    pub key: &'static str,
    pub filename: &'static str,
    pub path: PathBuf,
}

impl FormFile {
    /// Enlace público de descarga.
    pub fn download_link(&self) -> String {
        format!("/download_form/{}", self.key)
    }

    /// Nombre legible: "migration" → "Migration".
    pub fn title(&self) -> String {
        title_case(self.key)
    }
}

pub fn title_case(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct FormCatalog {
    dir: PathBuf,
}

impl FormCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Busca el formulario (sin distinguir mayúsculas) y comprueba que el fichero existe.
    pub async fn resolve(&self, name: &str) -> Result<FormFile, FormError> {
        let wanted = name.to_lowercase();
        let (key, filename) = FORMS
            .iter()
            .copied()
            .find(|(key, _)| *key == wanted)
            .ok_or_else(|| FormError::Unknown(name.to_string()))?;

        let path = self.dir.join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(FormFile {
                key,
                filename,
                path,
            }),
            _ => Err(FormError::Missing { key, path }),
        }
    }
}
