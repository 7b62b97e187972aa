use std::sync::atomic::Ordering;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};

use songforge_core::download::download_link_html;
use songforge_core::musicgen::GenerationParams;
use songforge_core::song::DEFAULT_DURATION_SECS;
use songforge_core::store::{AudioStore, SavedClip};
use songforge_core::waveform::compute_waveform_columns;
use songforge_core::{Genre, GenerationStatus, MusicGenerator, SongRequest, StatusSnapshot};

use crate::error::WebError;
use crate::page::{self, FormValues, Outcome, PageInfo};
use crate::state::{AppState, ModelState};

const WAVEFORM_COLUMNS: usize = 320;

#[derive(Debug, Default, Deserialize)]
pub struct GenerateForm {
    #[serde(default)]
    pub lyrics: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub duration: String,
}

impl GenerateForm {
    /// Echo what the user submitted, falling back to defaults for fields
    /// that do not parse.
    fn values(&self) -> FormValues {
        FormValues {
            lyrics: self.lyrics.clone(),
            genre: self.genre.parse().unwrap_or(Genre::Pop),
            duration_secs: self.duration.trim().parse().unwrap_or(DEFAULT_DURATION_SECS),
        }
    }

    fn to_request(&self) -> Result<SongRequest, songforge_core::Error> {
        let genre: Genre = self.genre.parse()?;
        let duration = self.duration.trim();
        let duration_secs = if duration.is_empty() {
            DEFAULT_DURATION_SECS
        } else {
            duration
                .parse()
                .map_err(|_| songforge_core::Error::InvalidDuration(duration.to_string()))?
        };
        SongRequest::new(&self.lyrics, genre, duration_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    #[serde(default)]
    pub download: bool,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub version: &'static str,
    pub model: String,
    pub offline: bool,
    pub model_loaded: bool,
    pub model_state: ModelState,
    pub sample_rate: u32,
    pub os: &'static str,
    pub arch: &'static str,
    pub cpu_threads: usize,
    pub status: String,
}

fn page_info(state: &AppState) -> PageInfo {
    PageInfo {
        version: songforge_core::VERSION,
        model: state.model_label.clone(),
        offline: state.offline,
        model_state: state.model_state(),
    }
}

pub async fn index(State(state): State<AppState>) -> Html<String> {
    let info = page_info(&state);
    Html(page::render(&FormValues::default(), None, &info))
}

type Produced = (SavedClip, Vec<(f32, f32)>, String);

/// Generate, save and summarise one clip on the calling thread.
fn produce_clip(
    generator: &mut dyn MusicGenerator,
    store: &AudioStore,
    prompt: &str,
    params: &GenerationParams,
    status: &GenerationStatus,
) -> songforge_core::Result<Produced> {
    let clip = generator.generate(prompt, params, &mut |p| status.set_progress(p))?;
    let saved = store.save(&clip)?;
    let columns = compute_waveform_columns(&clip.samples, WAVEFORM_COLUMNS);
    let link = download_link_html(&saved.path, "Generated Music")?;
    Ok((saved, columns, link))
}

/// Handle a form submission: validate, generate on a blocking thread,
/// save the clip and render the result. Generation failures are shown on
/// the page rather than returned as HTTP errors.
pub async fn generate(
    State(state): State<AppState>,
    Form(form): Form<GenerateForm>,
) -> Result<Html<String>, WebError> {
    let values = form.values();
    let request = match form.to_request() {
        Ok(request) => request,
        Err(e) => {
            let outcome = Outcome::Warning(e.to_string());
            let info = page_info(&state);
            return Ok(Html(page::render(&values, Some(&outcome), &info)));
        }
    };

    let preview = request.preview_json();
    let prompt = request.prompt();
    let mut params = state.defaults.clone();
    params.duration_secs = request.duration_secs() as f32;
    tracing::info!(
        genre = %request.genre(),
        duration = request.duration_secs(),
        "generation requested"
    );

    let permit = state
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| WebError::internal(format!("generator unavailable: {e}")))?;
    state.status.begin(&prompt);

    // This future may be dropped mid-generation, so the task owns the
    // permit and settles the status itself.
    let generator = state.generator.clone();
    let store = state.store.clone();
    let status = state.status.clone();
    let model_ready = state.model_ready.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let mut generator = generator.blocking_lock();
        let result = produce_clip(&mut **generator, &store, &prompt, &params, &status);
        model_ready.store(generator.is_loaded(), Ordering::Release);
        match &result {
            Ok(_) => status.complete(),
            Err(e) => {
                tracing::error!(error = %e, "generation failed");
                status.fail(e.to_string());
            }
        }
        result
    })
    .await
    .map_err(|e| {
        state.status.fail(format!("generation task failed: {e}"));
        WebError::internal(format!("task join error: {e}"))
    })?;

    let outcome = match result {
        Ok((saved, waveform, download_link)) => Outcome::Generated {
            preview,
            file_name: saved.file_name,
            duration_secs: saved.duration_secs,
            waveform,
            download_link,
        },
        Err(e) => Outcome::Failed {
            preview,
            message: e.to_string(),
        },
    };

    let info = page_info(&state);
    Ok(Html(page::render(&values, Some(&outcome), &info)))
}

pub async fn audio(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<AudioQuery>,
) -> Result<Response, WebError> {
    let path = state.store.resolve(&name)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| WebError::internal(format!("failed to read {name}: {e}")))?;

    let disposition = if query.download { "attachment" } else { "inline" };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/wav"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("{disposition}; filename=\"{name}\""))
            .map_err(|e| WebError::internal(e.to_string()))?,
    );
    Ok((headers, bytes).into_response())
}

pub async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot())
}

pub async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    let model_state = state.model_state();
    Json(InfoResponse {
        version: songforge_core::VERSION,
        model: state.model_label.clone(),
        offline: state.offline,
        model_loaded: model_state == ModelState::Loaded,
        model_state,
        sample_rate: songforge_core::musicgen::SAMPLE_RATE,
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        cpu_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
        status: state.status.status_text(),
    })
}

pub async fn health() -> &'static str {
    "ok"
}
