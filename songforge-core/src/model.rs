use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use serde::{Deserialize, Serialize};

use crate::error::{onnx_err, Error, Result};

pub const DEFAULT_MODEL: &str = "hf://Xenova/musicgen-small";

const TEXT_ENCODER: &str = "text_encoder.onnx";
const DECODER: &str = "decoder_model_merged.onnx";
const ENCODEC_DECODE: &str = "encodec_decode.onnx";
const TOKENIZER: &str = "tokenizer.json";
const ONNX_SUBDIR: &str = "onnx";

/// Where the MusicGen ONNX export comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelSource {
    Local(PathBuf),
    Hub {
        repo: String,
        revision: Option<String>,
    },
}

impl Default for ModelSource {
    fn default() -> Self {
        ModelSource::Hub {
            repo: "Xenova/musicgen-small".into(),
            revision: None,
        }
    }
}

impl FromStr for ModelSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some(rest) = s.strip_prefix("hf://") else {
            return Ok(ModelSource::Local(PathBuf::from(s)));
        };
        let (repo, revision) = match rest.split_once('@') {
            Some((repo, rev)) => (repo, Some(rev.to_string())),
            None => (rest, None),
        };
        if repo.split('/').filter(|p| !p.is_empty()).count() != 2 {
            return Err(Error::Config(format!("invalid hub model id: {s}")));
        }
        Ok(ModelSource::Hub {
            repo: repo.to_string(),
            revision,
        })
    }
}

impl TryFrom<String> for ModelSource {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ModelSource> for String {
    fn from(source: ModelSource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Local(path) => write!(f, "{}", path.display()),
            ModelSource::Hub {
                repo,
                revision: Some(rev),
            } => write!(f, "hf://{repo}@{rev}"),
            ModelSource::Hub { repo, revision: None } => write!(f, "hf://{repo}"),
        }
    }
}

/// Resolved paths of the files making up a MusicGen export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub text_encoder: PathBuf,
    pub decoder: PathBuf,
    pub encodec_decode: PathBuf,
    pub tokenizer: PathBuf,
}

impl ModelFiles {
    /// Locate the files in a local directory. The `.onnx` graphs may sit
    /// either next to `tokenizer.json` or in an `onnx/` subdirectory.
    pub fn in_dir(dir: &Path) -> Self {
        let graph = |name: &str| {
            let flat = dir.join(name);
            let nested = dir.join(ONNX_SUBDIR).join(name);
            if !flat.exists() && nested.exists() {
                nested
            } else {
                flat
            }
        };
        Self {
            text_encoder: graph(TEXT_ENCODER),
            decoder: graph(DECODER),
            encodec_decode: graph(ENCODEC_DECODE),
            tokenizer: dir.join(TOKENIZER),
        }
    }

    fn all(&self) -> [&Path; 4] {
        [
            &self.text_encoder,
            &self.decoder,
            &self.encodec_decode,
            &self.tokenizer,
        ]
    }

    /// Files that do not exist on disk.
    pub fn missing(&self) -> Vec<PathBuf> {
        self.all()
            .into_iter()
            .filter(|p| !p.exists())
            .map(Path::to_path_buf)
            .collect()
    }

    pub fn validate(self) -> Result<Self> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(self)
        } else {
            Err(Error::MissingModelFiles(missing))
        }
    }
}

fn hub_repo(repo: &str, revision: &Option<String>) -> hf_hub::Repo {
    match revision {
        Some(rev) => hf_hub::Repo::with_revision(repo.to_string(), hf_hub::RepoType::Model, rev.clone()),
        None => hf_hub::Repo::model(repo.to_string()),
    }
}

fn hub_file_names() -> [String; 4] {
    [
        format!("{ONNX_SUBDIR}/{TEXT_ENCODER}"),
        format!("{ONNX_SUBDIR}/{DECODER}"),
        format!("{ONNX_SUBDIR}/{ENCODEC_DECODE}"),
        TOKENIZER.to_string(),
    ]
}

/// Resolve a model source to local file paths, downloading from the
/// Hugging Face hub unless `offline` is set.
pub fn resolve(source: &ModelSource, offline: bool) -> Result<ModelFiles> {
    let (repo, revision) = match source {
        ModelSource::Local(dir) => return ModelFiles::in_dir(dir).validate(),
        ModelSource::Hub { repo, revision } => (repo, revision),
    };

    let names = hub_file_names();
    let mut paths = Vec::with_capacity(names.len());
    if offline {
        let cache = hf_hub::Cache::default().repo(hub_repo(repo, revision));
        for name in &names {
            let path = cache
                .get(name)
                .ok_or_else(|| Error::ModelUnavailable(source.to_string()))?;
            paths.push(path);
        }
    } else {
        let api = hf_hub::api::sync::Api::new()?;
        let remote = api.repo(hub_repo(repo, revision));
        for name in &names {
            tracing::info!(model = %source, file = %name, "fetching model file");
            paths.push(remote.get(name)?);
        }
    }

    let [text_encoder, decoder, encodec_decode, tokenizer]: [PathBuf; 4] = paths
        .try_into()
        .map_err(|_| Error::Download("incomplete model download".into()))?;
    ModelFiles {
        text_encoder,
        decoder,
        encodec_decode,
        tokenizer,
    }
    .validate()
}

/// Load an ONNX graph for CPU execution.
pub fn load_session(path: &Path, intra_threads: Option<usize>) -> Result<Session> {
    let mut builder = Session::builder()
        .map_err(onnx_err)?
        .with_optimization_level(GraphOptimizationLevel::Level1)
        .map_err(onnx_err)?;
    if let Some(threads) = intra_threads {
        builder = builder.with_intra_threads(threads).map_err(onnx_err)?;
    }
    builder.commit_from_file(path).map_err(onnx_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        assert_eq!(
            "hf://Xenova/musicgen-small".parse::<ModelSource>().unwrap(),
            ModelSource::default()
        );
        assert_eq!(
            "hf://org/model@v2".parse::<ModelSource>().unwrap(),
            ModelSource::Hub {
                repo: "org/model".into(),
                revision: Some("v2".into()),
            }
        );
        assert_eq!(
            "models/musicgen-small".parse::<ModelSource>().unwrap(),
            ModelSource::Local(PathBuf::from("models/musicgen-small"))
        );
        assert!("hf://just-a-name".parse::<ModelSource>().is_err());
    }

    #[test]
    fn test_display_roundtrips() {
        for s in [DEFAULT_MODEL, "hf://org/model@main", "/opt/models/mg"] {
            assert_eq!(s.parse::<ModelSource>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_in_dir_prefers_nested_graphs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("onnx")).unwrap();
        for name in [TEXT_ENCODER, DECODER, ENCODEC_DECODE] {
            std::fs::write(dir.path().join("onnx").join(name), b"").unwrap();
        }
        std::fs::write(dir.path().join(TOKENIZER), b"{}").unwrap();

        let files = ModelFiles::in_dir(dir.path()).validate().unwrap();
        assert_eq!(files.decoder, dir.path().join("onnx").join(DECODER));
        assert_eq!(files.tokenizer, dir.path().join(TOKENIZER));
    }

    #[test]
    fn test_missing_files_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TEXT_ENCODER), b"").unwrap();

        let files = ModelFiles::in_dir(dir.path());
        assert_eq!(files.missing().len(), 3);
        let err = resolve(&ModelSource::Local(dir.path().to_path_buf()), true).unwrap_err();
        assert!(matches!(err, Error::MissingModelFiles(ref m) if m.len() == 3));
    }
}
