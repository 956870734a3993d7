use std::path::Path;

use crate::afterimage::content_kind::MediaKind;

/// Declared MIME type (essence only) to file extension
const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/heic", "heic"),
    ("video/mp4", "mp4"),
    ("video/3gpp", "3gp"),
    ("video/quicktime", "mov"),
    ("video/webm", "webm"),
    ("audio/ogg", "ogg"),
    ("audio/mpeg", "mp3"),
    ("audio/mp4", "m4a"),
    ("audio/aac", "aac"),
    ("audio/amr", "amr"),
    ("audio/wav", "wav"),
    ("application/pdf", "pdf"),
    ("application/zip", "zip"),
    ("application/json", "json"),
    ("application/msword", "doc"),
    ("application/vnd.ms-excel", "xls"),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    ("text/plain", "txt"),
    ("text/csv", "csv"),
];

/// Strips parameters (`audio/ogg; codecs=opus` -> `audio/ogg`) and lowercases
fn mime_essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime_essence(mime);
    MIME_EXTENSIONS
        .iter()
        .find(|(known, _)| *known == essence)
        .map(|(_, extension)| *extension)
}

/// Extension of an original file name, when it looks like one
fn file_name_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
}

/// Picks the extension for a recovered payload.
///
/// Documents keep their original file name's extension. Otherwise the
/// declared MIME type is mapped, then the bytes are sniffed, then the
/// per-kind default applies.
pub fn file_extension(
    kind: MediaKind,
    declared_mime: Option<&str>,
    file_name: Option<&str>,
    bytes: &[u8],
) -> String {
    if kind == MediaKind::Document
        && let Some(extension) = file_name.and_then(file_name_extension)
    {
        return extension;
    }

    declared_mime
        .and_then(extension_for_mime)
        .or_else(|| infer::get(bytes).map(|t| t.extension()))
        .unwrap_or_else(|| kind.default_extension())
        .to_string()
}

/// MIME type to announce when forwarding the payload
pub fn effective_mime_type(kind: MediaKind, declared_mime: Option<&str>, bytes: &[u8]) -> String {
    declared_mime
        .map(mime_essence)
        .filter(|mime| mime.contains('/'))
        .or_else(|| infer::get(bytes).map(|t| t.mime_type().to_string()))
        .unwrap_or_else(|| kind.default_mime_type().to_string())
}
