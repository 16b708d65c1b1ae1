//! Path resolution.

use alloc::string::String;
use alloc::vec::Vec;

use super::FsError;

/// Resolves `path` against the working directory `cwd`.
///
/// The result is absolute with no empty, `.` or `..` components; `..` at the
/// root stays at the root.
pub fn resolve(cwd: &str, path: &str) -> Result<String, FsError> {
    if path.is_empty() || path.contains('\0') {
        return Err(FsError::InvalidPath);
    }
    let mut parts: Vec<&str> = Vec::new();
    let joined = if path.starts_with('/') { "" } else { cwd };
    for component in joined.split('/').chain(path.split('/')) {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    let mut out = String::with_capacity(path.len() + cwd.len() + 1);
    for part in &parts {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Last component of an absolute path, or `/` for the root.
pub fn file_name(path: &str) -> &str {
    match path.rsplit('/').find(|part| !part.is_empty()) {
        Some(name) => name,
        None => "/",
    }
}
