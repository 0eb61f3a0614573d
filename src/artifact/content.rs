//! Display names, content types and disposition for archived artifacts.

use std::path::Path;

/// Compression encodings and their fixed content types.
const COMPRESSION_TYPES: [(&str, &str); 5] = [
    ("gz", "application/gzip"),
    ("bz2", "application/x-bzip2"),
    ("xz", "application/x-xz"),
    ("zst", "application/zstd"),
    ("zip", "application/zip"),
];

const EXTENSION_TYPES: [(&str, &str); 19] = [
    ("txt", "text/plain; charset=utf-8"),
    ("log", "text/plain; charset=utf-8"),
    ("data", "text/plain; charset=utf-8"),
    ("csv", "text/csv; charset=utf-8"),
    ("tsv", "text/tab-separated-values; charset=utf-8"),
    ("md", "text/markdown; charset=utf-8"),
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("json", "application/json"),
    ("jsonl", "application/x-ndjson"),
    ("xml", "application/xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("pdf", "application/pdf"),
    ("tar", "application/x-tar"),
    ("parquet", "application/vnd.apache.parquet"),
];

const FALLBACK_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    /// Attachment above `inline_max_bytes`; otherwise inline only for types a
    /// browser can display.
    pub fn for_content(content_type: &str, size: u64, inline_max_bytes: u64) -> Self {
        if size > inline_max_bytes {
            return Disposition::Attachment;
        }
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        let displayable = essence.starts_with("text/")
            || essence.starts_with("image/")
            || essence == "application/json"
            || essence == "application/x-ndjson"
            || essence == "application/xml"
            || essence.ends_with("+json")
            || essence.ends_with("+xml");
        if displayable {
            Disposition::Inline
        } else {
            Disposition::Attachment
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        }
    }

    /// `Content-Disposition` header value for `file_name`.
    pub fn header_value(&self, file_name: &str) -> String {
        let safe: String = file_name
            .chars()
            .map(|c| {
                if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}; filename=\"{}\"", self.as_str(), safe)
    }
}

/// Strip temp-file suffixes left by writers that never renamed their output.
///
/// `out.data.tmp` becomes `out.data` and `out.data.tmp.gz` becomes `out.data.gz`.
pub fn clean_display_name(name: &str) -> String {
    if let Some(stem) = name.strip_suffix(".tmp") {
        return stem.to_string();
    }
    for (ext, _) in COMPRESSION_TYPES {
        if let Some(stem) = name.strip_suffix(&format!(".tmp.{}", ext)) {
            return format!("{}.{}", stem, ext);
        }
    }
    name.to_string()
}

/// Display name for a stored artifact path.
pub fn display_name(stored_path: &str) -> String {
    let raw = Path::new(stored_path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    clean_display_name(&raw)
}

/// Content type from a (cleaned) file name's last extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = match Path::new(file_name).extension() {
        Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
        None => return FALLBACK_TYPE,
    };
    COMPRESSION_TYPES
        .iter()
        .chain(EXTENSION_TYPES.iter())
        .find(|(known, _)| *known == ext)
        .map(|(_, content_type)| *content_type)
        .unwrap_or(FALLBACK_TYPE)
}
