//! Argument template expansion
//!
//! Turns a protocol entry's argument template plus the files (or target
//! directory) of one transfer into the concrete argument vector handed to the
//! external driver. Expansion is purely textual; no shell is ever involved.
//!
//! Placeholders:
//! - `{filePath}` standalone expands to one argument per file; inline it is
//!   replaced with the first file only.
//! - `{fileListPath}` expands to the path of a temp file holding one path per
//!   line, for drivers that take a batch via an indirection file.
//! - `{targetDir}` expands to the target directory with a trailing separator
//!   forced on. Some drivers concatenate directory + filename without
//!   inserting one.
//!
//! Templates with no file placeholder at all still work by positional
//! convention (classic `rz -b -r`): every file path is appended at the end.

use std::io::{self, Write};
use std::path::{MAIN_SEPARATOR, PathBuf};

const FILE_PATH_PLACEHOLDER: &str = "{filePath}";
const FILE_LIST_PLACEHOLDER: &str = "{fileListPath}";
const TARGET_DIR_PLACEHOLDER: &str = "{targetDir}";

/// Prefix for file-list temp files in the OS temp directory
const FILE_LIST_PREFIX: &str = "ferry-filelist-";

/// Expand an argument template for one transfer invocation
///
/// Returns the final argument vector and, when `{fileListPath}` was used,
/// the path of the file list written for it. The file list is a snapshot;
/// the caller owns its deletion once the external process has exited.
/// At most one list is created per call even if the placeholder repeats.
pub fn expand_args(
    template: &[String],
    file_paths: &[PathBuf],
    target_dir: &str,
) -> io::Result<(Vec<String>, Option<PathBuf>)> {
    let mut args = Vec::with_capacity(template.len() + file_paths.len());
    let mut file_list: Option<PathBuf> = None;
    let mut used_file_placeholder = false;

    for element in template {
        match element.as_str() {
            FILE_PATH_PLACEHOLDER => {
                used_file_placeholder = true;
                for path in file_paths {
                    args.push(path.display().to_string());
                }
            }
            TARGET_DIR_PLACEHOLDER => {
                args.push(with_trailing_separator(target_dir));
            }
            FILE_LIST_PLACEHOLDER => {
                used_file_placeholder = true;
                let list_path = ensure_file_list(&mut file_list, file_paths)?;
                args.push(list_path);
            }
            _ => {
                let mut expanded = element.clone();
                if expanded.contains(FILE_LIST_PLACEHOLDER) {
                    used_file_placeholder = true;
                    let list_path = ensure_file_list(&mut file_list, file_paths)?;
                    expanded = expanded.replace(FILE_LIST_PLACEHOLDER, &list_path);
                }
                if expanded.contains(FILE_PATH_PLACEHOLDER) {
                    used_file_placeholder = true;
                    let first = file_paths
                        .first()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    expanded = expanded.replace(FILE_PATH_PLACEHOLDER, &first);
                }
                if expanded.contains(TARGET_DIR_PLACEHOLDER) {
                    expanded = expanded
                        .replace(TARGET_DIR_PLACEHOLDER, &with_trailing_separator(target_dir));
                }
                args.push(expanded);
            }
        }
    }

    // Positional convention: templates that never named the files get them
    // appended at the end.
    if !used_file_placeholder && !file_paths.is_empty() {
        for path in file_paths {
            args.push(path.display().to_string());
        }
    }

    Ok((args, file_list))
}

/// Force a trailing path separator onto a non-empty directory path
///
/// An empty target dir stays empty; it must not become a bare separator.
fn with_trailing_separator(dir: &str) -> String {
    if dir.is_empty() || dir.ends_with(MAIN_SEPARATOR) || dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}{MAIN_SEPARATOR}")
    }
}

/// Write the file list on first use; later uses reuse the same path
///
/// No list is created for an empty file set (the placeholder expands to
/// nothing, and `execute_send` rejects empty sends long before this).
fn ensure_file_list(
    file_list: &mut Option<PathBuf>,
    file_paths: &[PathBuf],
) -> io::Result<String> {
    if let Some(path) = file_list {
        return Ok(path.display().to_string());
    }
    if file_paths.is_empty() {
        return Ok(String::new());
    }

    let path = write_file_list(file_paths)?;
    let as_string = path.display().to_string();
    *file_list = Some(path);
    Ok(as_string)
}

/// Materialize a file list in the OS temp directory, one path per line
fn write_file_list(file_paths: &[PathBuf]) -> io::Result<PathBuf> {
    let mut temp = tempfile::Builder::new()
        .prefix(FILE_LIST_PREFIX)
        .suffix(".lst")
        .tempfile()?;

    for path in file_paths {
        writeln!(temp, "{}", path.display())?;
    }
    temp.flush()?;

    // Detach from the guard so the file survives until the dispatch layer
    // deletes it after the external process exits.
    let (_, path) = temp.keep().map_err(|e| e.error)?;
    Ok(path)
}
