//! Server-rendered HTML for the generator page.

use std::fmt::Write;

use songforge_core::download::escape_html;
use songforge_core::song::{
    duration_choices, DEFAULT_DURATION_SECS, DURATION_STEP_SECS, MAX_DURATION_SECS,
    MIN_DURATION_SECS,
};
use songforge_core::waveform;
use songforge_core::Genre;

use crate::state::ModelState;

const THEME_CSS: &str = include_str!("../assets/theme.css");
const LOGO_URL: &str = "https://cdn-icons-png.flaticon.com/512/727/727245.png";

const WAVEFORM_WIDTH: f32 = 640.0;
const WAVEFORM_HEIGHT: f32 = 80.0;

const STATUS_SCRIPT: &str = r#"
document.getElementById('song-form').addEventListener('submit', function () {
  document.getElementById('generate-btn').disabled = true;
  var spinner = document.getElementById('spinner');
  spinner.classList.add('active');
  setInterval(function () {
    fetch('/api/status').then(function (r) { return r.json(); }).then(function (s) {
      if (s.state === 'Generating') {
        spinner.textContent = '🎹 Generating melody... ' + Math.round(s.progress * 100) + '%';
      }
    }).catch(function () {});
  }, 1000);
});
"#;

/// Values the form is rendered with.
#[derive(Debug, Clone, PartialEq)]
pub struct FormValues {
    pub lyrics: String,
    pub genre: Genre,
    pub duration_secs: u32,
}

impl Default for FormValues {
    fn default() -> Self {
        Self {
            lyrics: String::new(),
            genre: Genre::Pop,
            duration_secs: DEFAULT_DURATION_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Warning(String),
    Generated {
        preview: String,
        file_name: String,
        duration_secs: f32,
        waveform: Vec<(f32, f32)>,
        download_link: String,
    },
    Failed {
        preview: String,
        message: String,
    },
}

/// Footer debug details.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub version: &'static str,
    pub model: String,
    pub offline: bool,
    pub model_state: ModelState,
}

fn render_form(out: &mut String, form: &FormValues) {
    out.push_str(r#"<h2>📝 Enter Lyrics &amp; Choose Genre</h2>"#);
    out.push_str(r#"<form id="song-form" method="post" action="/generate">"#);
    let _ = write!(
        out,
        r#"<div class="field"><label for="lyrics">🔥 Enter your song lyrics:</label><textarea id="lyrics" name="lyrics" rows="7">{}</textarea></div>"#,
        escape_html(&form.lyrics)
    );

    out.push_str(r#"<div class="field"><label for="genre">🎼 Select a music genre:</label><select id="genre" name="genre">"#);
    for genre in Genre::ALL {
        let selected = if genre == form.genre { " selected" } else { "" };
        let _ = write!(
            out,
            r#"<option value="{}"{selected}>{}</option>"#,
            genre.name(),
            genre.label()
        );
    }
    out.push_str("</select></div>");

    let _ = write!(
        out,
        r#"<div class="field"><label for="duration">🎵 Select music duration (in seconds): <output id="duration-value">{d}</output></label><input class="slider" type="range" id="duration" name="duration" min="{MIN_DURATION_SECS}" max="{MAX_DURATION_SECS}" step="{DURATION_STEP_SECS}" value="{d}" list="duration-marks" oninput="document.getElementById('duration-value').value = this.value"><datalist id="duration-marks">"#,
        d = form.duration_secs
    );
    for secs in duration_choices() {
        let _ = write!(out, r#"<option value="{secs}"></option>"#);
    }
    out.push_str("</datalist></div>");

    out.push_str(r#"<h2>🎧 Generate Music</h2><button id="generate-btn" type="submit">Generate Music 🎶</button>"#);
    out.push_str(r#"<div id="spinner" class="spinner">🎹 Generating melody... please wait...</div></form>"#);
}

fn render_preview(out: &mut String, preview: &str) {
    let _ = write!(
        out,
        r#"<h3>🎵 Preview</h3><pre><code class="language-json">{}</code></pre>"#,
        escape_html(preview)
    );
}

fn render_outcome(out: &mut String, outcome: &Outcome) {
    match outcome {
        Outcome::Warning(message) => {
            let _ = write!(out, r#"<div class="notice warning">⚠️ {}</div>"#, escape_html(message));
        }
        Outcome::Failed { preview, message } => {
            render_preview(out, preview);
            let _ = write!(
                out,
                r#"<div class="notice error">❌ Failed to generate music: {}</div>"#,
                escape_html(message)
            );
        }
        Outcome::Generated {
            preview,
            file_name,
            duration_secs,
            waveform: columns,
            download_link,
        } => {
            render_preview(out, preview);
            let file = escape_html(file_name);
            let _ = write!(
                out,
                r#"<h3>🔊 Listen to Generated Music</h3><div class="notice success">✅ Music generated successfully! ({duration_secs:.1}s)</div><audio controls src="/audio/{file}"></audio>"#
            );
            let _ = write!(
                out,
                r#"<svg class="waveform" viewBox="0 0 {WAVEFORM_WIDTH} {WAVEFORM_HEIGHT}" width="100%" height="{WAVEFORM_HEIGHT}"><path d="{}"/></svg>"#,
                waveform::svg_path(columns, WAVEFORM_WIDTH, WAVEFORM_HEIGHT)
            );
            out.push_str(download_link);
        }
    }
}

/// Render the full page.
pub fn render(form: &FormValues, outcome: Option<&Outcome>, info: &PageInfo) -> String {
    let mut out = String::with_capacity(8 * 1024);
    out.push_str(r#"<!DOCTYPE html><html lang="en"><head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1">"#);
    out.push_str("<title>AI Music Generator 🎶</title>");
    let _ = write!(out, "<style>{THEME_CSS}</style></head><body>");
    let _ = write!(out, r#"<img class="logo" src="{LOGO_URL}" alt="logo">"#);
    out.push_str(r#"<main class="block-container"><h1>🎼 AI Music Generator</h1>"#);
    out.push_str(
        "<details><summary>ℹ️ How it works</summary><p>🎤 Enter <strong>lyrics</strong>, pick a 🎧 <strong>music genre</strong>, and click <strong>Generate Music</strong>. \
         Meta's <a href=\"https://github.com/facebookresearch/audiocraft\">MusicGen</a> turns your lyrics into audio.</p></details>",
    );

    render_form(&mut out, form);
    if let Some(outcome) = outcome {
        render_outcome(&mut out, outcome);
    }

    let _ = write!(
        out,
        "<footer>🔧 SongForge {} · model {} · {} · {}</footer>",
        info.version,
        escape_html(&info.model),
        info.model_state.label(),
        if info.offline { "offline" } else { "online" },
    );
    let _ = write!(out, "</main><script>{STATUS_SCRIPT}</script></body></html>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> PageInfo {
        PageInfo {
            version: "0.1.0",
            model: "hf://Xenova/musicgen-small".into(),
            offline: true,
            model_state: ModelState::NotLoaded,
        }
    }

    #[test]
    fn test_form_defaults() {
        let html = render(&FormValues::default(), None, &info());
        assert!(html.contains("🎼 AI Music Generator"));
        assert!(html.contains(r#"<option value="Pop" selected>🎤 Pop</option>"#));
        assert!(html.contains(r#"min="30" max="180" step="30" value="60""#));
        assert_eq!(html.matches("<option value=\"").count(), 10 + 6);
        assert!(html.contains("offline"));
        assert!(html.contains("not loaded yet"));
    }

    #[test]
    fn test_lyrics_are_escaped() {
        let form = FormValues {
            lyrics: "<script>alert(1)</script>".into(),
            genre: Genre::Jazz,
            duration_secs: 120,
        };
        let html = render(&form, None, &info());
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(html.contains(r#"<option value="Jazz" selected>"#));
    }

    #[test]
    fn test_failure_is_displayed() {
        let outcome = Outcome::Failed {
            preview: "{}".into(),
            message: "model missing".into(),
        };
        let html = render(&FormValues::default(), Some(&outcome), &info());
        assert!(html.contains("❌ Failed to generate music: model missing"));
        assert!(html.contains("🎵 Preview"));
    }
}
