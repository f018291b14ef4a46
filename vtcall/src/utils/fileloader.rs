use std::{
    env,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
    #[error("File {path} not found: {message}", path = path.display())]
    FileNotFound { message: String, path: PathBuf },
    #[error("Failed to convert into UTF: {0}")]
    UtfConversionError(#[from] std::string::FromUtf8Error),
}

/// Resolve `relpath` against the directory of `current_file_or_dir`.
pub fn get_canonical_path(current_file_or_dir: &str, relpath: &str) -> Result<PathBuf, Error> {
    let parent_dir = get_parent_dir(current_file_or_dir)?;
    let abspath = [parent_dir, PathBuf::from(relpath)]
        .into_iter()
        .collect::<PathBuf>();
    abspath.canonicalize().map_err(|e| Error::FileNotFound {
        message: e.to_string(),
        path: abspath,
    })
}

fn get_parent_dir(current_file: &str) -> Result<PathBuf, Error> {
    let current_filepath = Path::new(current_file);
    if current_filepath.is_dir() {
        Ok(current_filepath.into())
    } else {
        let cwd = env::current_dir()?;
        Ok(current_filepath.parent().map_or_else(|| cwd, PathBuf::from))
    }
}

pub fn load(canonical_path: &Path) -> Result<String, Error> {
    let content = std::fs::read(canonical_path).map_err(|e| Error::FileNotFound {
        message: e.to_string(),
        path: canonical_path.to_path_buf(),
    })?;
    Ok(String::from_utf8(content)?)
}
