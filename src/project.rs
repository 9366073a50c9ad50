//! Per-project account binding
//!
//! A `.gitpersona` file at a project root names the account to use there:
//! `{ "account": "work" }`.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::AppError;

/// Override file name at a project root
pub const PROJECT_FILE: &str = ".gitpersona";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub account: String,
}

/// Alias bound in `dir`, if the directory carries an override file
pub fn read_project_file(dir: &Path) -> Result<Option<String>, AppError> {
    let path = dir.join(PROJECT_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let file: ProjectFile = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let alias = file.account.trim();
    Ok((!alias.is_empty()).then(|| alias.to_string()))
}

pub fn write_project_file(dir: &Path, alias: &str) -> Result<PathBuf, AppError> {
    let path = dir.join(PROJECT_FILE);
    let json = serde_json::to_string_pretty(&ProjectFile {
        account: alias.to_string(),
    })?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(&path).map_err(|e| AppError::Io(e.error))?;
    Ok(path)
}

/// Removes the override file; returns whether one existed
pub fn remove_project_file(dir: &Path) -> Result<bool, AppError> {
    let path = dir.join(PROJECT_FILE);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path)?;
    Ok(true)
}

/// Nearest override walking up from `start`: `(project root, alias)`
pub fn resolve_project_alias(start: &Path) -> Option<(PathBuf, String)> {
    for dir in start.ancestors() {
        match read_project_file(dir) {
            Ok(Some(alias)) => return Some((dir.to_path_buf(), alias)),
            Ok(None) => {}
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "ignoring unreadable project file");
            }
        }
    }
    None
}
