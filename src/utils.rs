use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Normalises a user-typed path: surrounding whitespace and double quotes are
/// removed, backslashes become forward slashes and a leading `~` is expanded.
pub fn normalize_path(input: &str) -> String {
    let stripped = input.trim().trim_matches('"').replace('\\', "/");
    shellexpand::tilde(stripped.as_str()).to_string()
}

/// Accepts an existing directory or creates a missing one. Fails when the path
/// is empty, points to a regular file, or cannot be created.
pub fn ensure_directory(path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(Error::Validation("Path cannot be empty.".to_string()));
    }

    let dir = Path::new(path);
    if dir.is_dir() {
        return Ok(dir.to_path_buf());
    }
    if dir.exists() {
        return Err(Error::Validation(format!(
            "Path \"{path}\" points to a file, not a directory."
        )));
    }

    std::fs::create_dir_all(dir).map_err(|e| {
        Error::Validation(format!("Could not create path. System error: {e}"))
    })?;
    tracing::info!(path, "created storage directory");
    Ok(dir.to_path_buf())
}

/// Splits `"/cmd rest of line"` into the lower-cased command and the raw
/// remainder, mirroring a `split(maxsplit=1)`.
pub fn split_command(line: &str) -> (String, Option<&str>) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => {
            let rest = rest.trim();
            let rest = if rest.is_empty() { None } else { Some(rest) };
            (cmd.to_lowercase(), rest)
        }
        None => (line.to_lowercase(), None),
    }
}

/// Removes one level of surrounding double quotes from a command argument.
pub fn unquote(arg: &str) -> &str {
    arg.trim().trim_matches('"')
}
