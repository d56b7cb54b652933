//! Per-survey file storage.
//!
//! Each survey owns a directory under `vars_dir` holding its data
//! dictionary, cluster artifact and prompts, and a directory under
//! `desc_dir` holding its theme description:
//!
//! ```text
//! vars_dir/<idno>/<idno>_variables.json
//! vars_dir/<idno>/<idno>_cluster.json
//! vars_dir/<idno>/<idno>_prompt.json
//! desc_dir/<idno>/<idno>_description.json
//! ```
//!
//! Directories are created on write. Files are replaced atomically.

use std::io::Write;
use std::path::{Path, PathBuf};

use atomicwrites::{AtomicFile, OverwriteBehavior};
use microdata_types::{EnrichmentArtifact, Settings};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::error::ThemesError;
use crate::prompts::ThemePrompt;
use crate::theme_llm::ThemeDescription;

/// File-backed store for one `vars_dir`/`desc_dir` pair.
#[derive(Debug, Clone)]
pub struct ThemeStorage {
    vars_dir: PathBuf,
    desc_dir: PathBuf,
}

impl ThemeStorage {
    pub fn new(vars_dir: impl Into<PathBuf>, desc_dir: impl Into<PathBuf>) -> Self {
        Self {
            vars_dir: vars_dir.into(),
            desc_dir: desc_dir.into(),
        }
    }

    /// Storage rooted at the directories named in `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.vars_path(), settings.desc_path())
    }

    pub fn vars_dir(&self) -> &Path {
        &self.vars_dir
    }

    pub fn desc_dir(&self) -> &Path {
        &self.desc_dir
    }

    pub fn variables_path(&self, idno: &str) -> Result<PathBuf, ThemesError> {
        self.survey_file(&self.vars_dir, idno, "variables")
    }

    pub fn cluster_path(&self, idno: &str) -> Result<PathBuf, ThemesError> {
        self.survey_file(&self.vars_dir, idno, "cluster")
    }

    pub fn prompt_path(&self, idno: &str) -> Result<PathBuf, ThemesError> {
        self.survey_file(&self.vars_dir, idno, "prompt")
    }

    pub fn description_path(&self, idno: &str) -> Result<PathBuf, ThemesError> {
        self.survey_file(&self.desc_dir, idno, "description")
    }

    fn survey_file(&self, root: &Path, idno: &str, kind: &str) -> Result<PathBuf, ThemesError> {
        validate_idno(idno)?;
        Ok(root.join(idno).join(format!("{idno}_{kind}.json")))
    }

    // --- Data dictionary ---

    pub fn load_dictionary(&self, idno: &str) -> Result<Option<Value>, ThemesError> {
        read_json(&self.variables_path(idno)?)
    }

    #[instrument(skip(self, dictionary))]
    pub fn save_dictionary(&self, idno: &str, dictionary: &Value) -> Result<(), ThemesError> {
        let path = self.variables_path(idno)?;
        write_json(&path, dictionary)?;
        debug!(path = %path.display(), "Saved data dictionary");
        Ok(())
    }

    // --- Cluster artifact ---

    pub fn load_artifact(&self, idno: &str) -> Result<Option<EnrichmentArtifact>, ThemesError> {
        read_json(&self.cluster_path(idno)?)
    }

    #[instrument(skip(self, artifact), fields(idno = %artifact.idno))]
    pub fn save_artifact(&self, artifact: &EnrichmentArtifact) -> Result<(), ThemesError> {
        let path = self.cluster_path(&artifact.idno)?;
        write_json(&path, artifact)?;
        debug!(path = %path.display(), clusters = artifact.cluster_count(), "Saved cluster artifact");
        Ok(())
    }

    // --- Prompts ---

    pub fn load_prompts(&self, idno: &str) -> Result<Option<Vec<ThemePrompt>>, ThemesError> {
        read_json(&self.prompt_path(idno)?)
    }

    pub fn save_prompts(&self, idno: &str, prompts: &[ThemePrompt]) -> Result<(), ThemesError> {
        let path = self.prompt_path(idno)?;
        write_json(&path, &prompts)?;
        debug!(path = %path.display(), count = prompts.len(), "Saved prompts");
        Ok(())
    }

    // --- Description ---

    pub fn load_description(&self, idno: &str) -> Result<Option<ThemeDescription>, ThemesError> {
        read_json(&self.description_path(idno)?)
    }

    pub fn save_description(&self, description: &ThemeDescription) -> Result<(), ThemesError> {
        let path = self.description_path(&description.idno)?;
        write_json(&path, description)?;
        debug!(path = %path.display(), "Saved theme description");
        Ok(())
    }

    /// Delete the dictionary, artifact and prompt files for `idno`.
    ///
    /// Missing files are skipped. Returns the paths actually removed.
    #[instrument(skip(self))]
    pub fn clean(&self, idno: &str) -> Result<Vec<PathBuf>, ThemesError> {
        let mut removed = Vec::new();
        for path in [
            self.variables_path(idno)?,
            self.cluster_path(idno)?,
            self.prompt_path(idno)?,
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        // Drop the survey directory once nothing is left in it
        let dir = self.vars_dir.join(idno);
        if dir.is_dir() && std::fs::read_dir(&dir)?.next().is_none() {
            std::fs::remove_dir(&dir)?;
        }

        info!(idno = %idno, removed = removed.len(), "Cleaned survey state");
        Ok(removed)
    }
}

/// Study ids become path components, so they must be a single plain name.
fn validate_idno(idno: &str) -> Result<(), ThemesError> {
    let bad = idno.trim().is_empty()
        || idno == "."
        || idno == ".."
        || idno.contains(['/', '\\'])
        || idno.contains('\0');
    if bad {
        return Err(ThemesError::Config(format!("invalid study id: {idno:?}")));
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ThemesError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ThemesError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|f| f.write_all(&bytes))
        .map_err(|e| match e {
            atomicwrites::Error::Internal(io) | atomicwrites::Error::User(io) => ThemesError::Io(io),
        })?;
    Ok(())
}
