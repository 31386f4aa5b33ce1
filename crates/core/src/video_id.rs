use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FinderError, Result};

static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:youtube\.com/watch\?(?:[^#\s]*&)?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/)([A-Za-z0-9_-]{11})",
    )
    .expect("video URL pattern is valid")
});

static BARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("video id pattern is valid"));

/// Extract the 11-character video id from a URL, or accept a bare id.
pub fn extract_video_id(input: &str) -> Result<String> {
    let input = input.trim();

    if let Some(captures) = VIDEO_URL.captures(input) {
        return Ok(captures[1].to_string());
    }
    if BARE_ID.is_match(input) {
        return Ok(input.to_string());
    }

    Err(FinderError::InvalidVideoId {
        input: input.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_supported_shapes() {
        for input in [
            "dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?list=PL1&v=dQw4w9WgXcQ&t=10",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
            "  dQw4w9WgXcQ\n",
        ] {
            assert_eq!(extract_video_id(input).unwrap(), "dQw4w9WgXcQ", "{input}");
        }
    }

    #[test]
    fn rejects_everything_else() {
        for input in ["", "short", "https://example.com/watch?v=abc", "dQw4w9WgXcQ-too-long"] {
            assert!(matches!(
                extract_video_id(input),
                Err(FinderError::InvalidVideoId { .. })
            ));
        }
    }
}
