//! Ingesta del documento SRB: extracción de texto por páginas y troceado en
//! chunks solapados que nunca cruzan el límite de una página.

use std::{collections::VecDeque, ops::Range, path::Path};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::models::{Chunk, PageRecord};

/// Separadores en orden de preferencia: párrafo, línea, palabra, carácter.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Resumen de una construcción del índice.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub pages_loaded: usize,
    pub chunks_created: usize,
    pub embedding_batches: usize,
    pub dimensions: usize,
}

impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} páginas con texto, {} chunks, {} lotes de embeddings (dimensión {}).",
            self.pages_loaded, self.chunks_created, self.embedding_batches, self.dimensions
        )
    }
}

/// Parámetros del troceado, en caracteres.
#[derive(Debug, Clone, Copy)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// Lee el PDF y devuelve una entrada por página con texto útil.
pub async fn load_pages(path: &Path) -> Result<Vec<PageRecord>> {
    if !path.is_file() {
        return Err(anyhow!("No se encuentra el PDF fuente: {}", path.display()));
    }

    let path_buf = path.to_path_buf();
    let raw_pages =
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_by_pages(&path_buf))
            .await
            .context("La tarea de extracción del PDF terminó de forma inesperada")?
            .map_err(|e| anyhow!("No se pudo extraer texto del PDF {}: {}", path.display(), e))?;

    let total = raw_pages.len();
    let pages = pages_from_text(raw_pages);
    if pages.len() < total {
        warn!(
            "{} de {} páginas de {} no tienen texto extraíble.",
            total - pages.len(),
            total,
            path.display()
        );
    }
    info!("Cargadas {} páginas desde {}", pages.len(), path.display());
    Ok(pages)
}

/// Numera las páginas desde 1 y descarta las que sólo contienen espacios.
pub fn pages_from_text(raw_pages: Vec<String>) -> Vec<PageRecord> {
    raw_pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| PageRecord { page: i + 1, text })
        .collect()
}

/// Trocea todas las páginas. Los índices de chunk son globales y consecutivos.
pub fn split_pages(pages: &[PageRecord], config: SplitterConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for page in pages {
        for span in split_text(&page.text, config) {
            let text = page.text[span.clone()].to_string();
            chunks.push(Chunk {
                chunk_index: chunks.len(),
                page: page.page,
                start: span.start,
                end: span.end,
                text,
            });
        }
    }
    chunks
}

/// Devuelve los rangos (en bytes) de los chunks de un texto.
///
/// Cada rango tiene como mucho `chunk_size` caracteres, no empieza ni termina
/// con espacios, y comparte hasta `chunk_overlap` caracteres con el anterior.
pub fn split_text(text: &str, config: SplitterConfig) -> Vec<Range<usize>> {
    let pieces = split_ranges(text, 0..text.len(), config.chunk_size, &SEPARATORS);
    let mut spans: Vec<Range<usize>> = merge_pieces(text, &pieces, config)
        .into_iter()
        .filter_map(|span| trim_span(text, span))
        .collect();
    spans.dedup();
    spans
}

/// Divide `range` en piezas contiguas que cubren todo el rango, bajando de
/// separador hasta que cada pieza cabe en `chunk_size`.
fn split_ranges(
    text: &str,
    range: Range<usize>,
    chunk_size: usize,
    separators: &[&str],
) -> Vec<Range<usize>> {
    let slice = &text[range.clone()];
    if slice.chars().count() <= chunk_size {
        return vec![range];
    }
    let Some((separator, rest)) = separators.split_first() else {
        return vec![range];
    };

    if separator.is_empty() {
        return slice
            .char_indices()
            .map(|(i, c)| range.start + i..range.start + i + c.len_utf8())
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = range.start;
    for (idx, _) in slice.match_indices(separator) {
        // El separador queda pegado a la pieza anterior.
        let end = range.start + idx + separator.len();
        pieces.extend(split_ranges(text, start..end, chunk_size, rest));
        start = end;
    }
    if start < range.end {
        pieces.extend(split_ranges(text, start..range.end, chunk_size, rest));
    }
    pieces
}

/// Agrupa piezas contiguas en ventanas de hasta `chunk_size` caracteres,
/// arrastrando a la siguiente ventana hasta `chunk_overlap` caracteres.
fn merge_pieces(text: &str, pieces: &[Range<usize>], config: SplitterConfig) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
    let mut total = 0;

    for piece in pieces {
        let len = text[piece.clone()].chars().count();
        if total + len > config.chunk_size && !window.is_empty() {
            spans.push(window_span(&window));
            while total > config.chunk_overlap || (total + len > config.chunk_size && total > 0) {
                match window.pop_front() {
                    Some((_, dropped)) => total -= dropped,
                    None => break,
                }
            }
        }
        window.push_back((piece.clone(), len));
        total += len;
    }

    if !window.is_empty() {
        spans.push(window_span(&window));
    }
    spans
}

fn window_span(window: &VecDeque<(Range<usize>, usize)>) -> Range<usize> {
    let start = window.front().map_or(0, |(r, _)| r.start);
    let end = window.back().map_or(start, |(r, _)| r.end);
    start..end
}

fn trim_span(text: &str, span: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[span.clone()];
    let leading = slice.len() - slice.trim_start().len();
    if leading == slice.len() {
        return None;
    }
    let trailing = slice.len() - slice.trim_end().len();
    Some(span.start + leading..span.end - trailing)
}
