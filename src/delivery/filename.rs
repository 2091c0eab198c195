//! Deterministic filename derivation for delivered artifacts.

/// Characters stripped from server-suggested titles before use as filenames
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Map a declared content type to a file extension
///
/// Unknown types default to `.mp4`; the service only produces media
/// artifacts, so a video container is the least surprising guess.
pub(crate) fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "video/x-matroska" => ".mkv",
        "audio/mpeg" => ".mp3",
        "audio/mp4" => ".m4a",
        "application/zip" => ".zip",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/webp" => ".webp",
        _ => ".mp4",
    }
}

/// Strip filesystem-hostile characters and surrounding whitespace
pub(crate) fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| !FORBIDDEN.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Derive the filename an artifact is written under
///
/// Preference order: the server's filename hint, then the sanitized
/// suggested title with an extension from the content type, then the
/// artifact id. The same inputs always produce the same name.
pub(crate) fn derive_filename(
    filename_hint: Option<&str>,
    suggested_title: &str,
    artifact_id: &str,
    content_type: &str,
) -> String {
    if let Some(hint) = filename_hint {
        let hint = sanitize(hint);
        if !hint.is_empty() {
            return hint;
        }
    }

    let extension = extension_for(content_type);
    let base = sanitize(suggested_title);
    let base = if base.is_empty() {
        artifact_id.to_string()
    } else {
        base
    };

    if base.to_ascii_lowercase().ends_with(extension) {
        base
    } else {
        format!("{base}{extension}")
    }
}
