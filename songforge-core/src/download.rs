//! Self-contained download links for generated clips.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};

use crate::error::Result;

/// Escape text for use in HTML element content or quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64_STANDARD.encode(bytes))
}

/// Anchor embedding the whole file as a `data:` URI, so the download
/// works without another request to the server.
pub fn download_link_html(path: &Path, label: &str) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(format!(
        r#"<a class="download-btn" href="{}" download="{}">📥 Download {}</a>"#,
        data_uri("audio/wav", &bytes),
        escape_html(&file_name),
        escape_html(label),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape_html(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_link_embeds_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio_0.wav");
        std::fs::write(&path, b"RIFF").unwrap();

        let html = download_link_html(&path, "Generated Music").unwrap();
        assert!(html.contains(r#"href="data:audio/wav;base64,UklGRg==""#));
        assert!(html.contains(r#"download="audio_0.wav""#));
        assert!(html.contains("📥 Download Generated Music"));
    }
}
