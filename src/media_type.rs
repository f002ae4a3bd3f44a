#![forbid(unsafe_code)]

//! Content-type resolution for served files.
//!
//! A wrong-but-present content type still lets players negotiate, while a
//! missing one blocks playback outright, so unknown extensions resolve to
//! `application/octet-stream` instead of failing the request.

use std::path::Path;

use mime_guess::{
    MimeGuess,
    mime::{APPLICATION_OCTET_STREAM, Mime},
};

/// Resolves the MIME type for a stored file, preferring an explicit override
/// recorded by the catalog over the extension-based guess.
pub fn resolve(path: &Path, override_type: Option<&str>) -> Mime {
    if let Some(raw) = override_type
        && let Ok(mime) = raw.parse()
    {
        return mime;
    }
    MimeGuess::from_path(path)
        .first()
        .unwrap_or(APPLICATION_OCTET_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mp4_maps_to_video_mp4() {
        let mime = resolve(Path::new("/media/heat.mp4"), None);
        assert_eq!(mime.essence_str(), "video/mp4");
    }

    #[test]
    fn webm_maps_to_video_webm() {
        let mime = resolve(Path::new("clip.webm"), None);
        assert_eq!(mime.essence_str(), "video/webm");
    }

    #[test]
    fn unknown_extension_defaults_to_octet_stream() {
        let mime = resolve(Path::new("movie.zzz"), None);
        assert_eq!(mime, APPLICATION_OCTET_STREAM);
    }

    #[test]
    fn missing_extension_defaults_to_octet_stream() {
        let mime = resolve(Path::new("raw-upload"), None);
        assert_eq!(mime, APPLICATION_OCTET_STREAM);
    }

    #[test]
    fn catalog_override_wins_over_extension() {
        let mime = resolve(Path::new("movie.bin"), Some("video/mp4"));
        assert_eq!(mime.essence_str(), "video/mp4");
    }

    #[test]
    fn invalid_override_falls_back_to_guess() {
        let mime = resolve(Path::new("movie.mp4"), Some("not a mime"));
        assert_eq!(mime.essence_str(), "video/mp4");
    }
}
