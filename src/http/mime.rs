//! File extension to MIME type mapping for static file serving.

use std::path::Path;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// MIME type for `path` derived from its extension (case-insensitive).
pub fn from_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(from_extension)
        .unwrap_or(DEFAULT_MIME_TYPE)
}

pub fn from_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => DEFAULT_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_maps_to_text_html() {
        assert_eq!(from_path(Path::new("./404.html")), "text/html");
        assert_eq!(from_path(Path::new("INDEX.HTM")), "text/html");
    }

    #[test]
    fn unknown_or_missing_extension_is_octet_stream() {
        assert_eq!(from_path(Path::new("data.bin")), DEFAULT_MIME_TYPE);
        assert_eq!(from_path(Path::new("Makefile")), DEFAULT_MIME_TYPE);
    }
}
