use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CsvMetadata {
    /// Header text as it appears in the file.
    pub raw_headers: Vec<String>,
    /// Folded header names, same order as `raw_headers`.
    pub columns: Vec<String>,
}

impl CsvMetadata {
    pub fn new(raw_headers: Vec<String>) -> Self {
        let columns = raw_headers.iter().map(|h| normalize_col_name(h)).collect();
        CsvMetadata {
            raw_headers,
            columns,
        }
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        let folded = normalize_col_name(column);
        self.columns.iter().position(|c| *c == folded)
    }
}

/// Folds case, whitespace and punctuation so that "Product Category",
/// "product-category" and " PRODUCT_CATEGORY " all map to `product_category`.
pub fn normalize_col_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;

    for ch in name.trim_start_matches('\u{feff}').chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }

    out
}
