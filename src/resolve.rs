//! Variable substitution and source/destination path resolution for
//! COPY, ADD, and every instruction that accepts `$VAR` references.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Substitutes `$NAME` and `${NAME}` using the *last* binding of `NAME` in
/// `envs`. Unknown names expand to empty; `\$` escapes the substitution.
///
/// With `is_filepath` the result is path-cleaned, preserving a trailing
/// separator present in the original literal.
pub fn resolve_environment_replacement(
    value: &str,
    envs: &[String],
    is_filepath: bool,
) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'$') => {
                chars.next();
                out.push('$');
                // Swallow the escaped name so `\$foo` comes out as `$foo`.
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        out.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
            }
            '$' => {
                let name = if chars.peek() == Some(&'{') {
                    chars.next();
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(Error::Parse {
                                    reason: format!("unterminated ${{...}} in: {value}"),
                                })
                            }
                        }
                    }
                    name
                } else {
                    let mut name = String::new();
                    while let Some(&next) = chars.peek() {
                        if next.is_alphanumeric() || next == '_' {
                            name.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    name
                };
                out.push_str(&lookup_env(&name, envs).unwrap_or_default());
            }
            c => out.push(c),
        }
    }

    if is_filepath {
        let trailing = value.ends_with('/');
        let mut cleaned = clean_path(&out);
        if trailing && !cleaned.ends_with('/') {
            cleaned.push('/');
        }
        return Ok(cleaned);
    }
    Ok(out)
}

/// [`resolve_environment_replacement`] over a list.
pub fn resolve_environment_replacement_list(
    values: &[String],
    envs: &[String],
    is_filepath: bool,
) -> Result<Vec<String>> {
    values
        .iter()
        .map(|v| resolve_environment_replacement(v, envs, is_filepath))
        .collect()
}

/// Last binding of `name` among `KEY=VALUE` strings.
fn lookup_env(name: &str, envs: &[String]) -> Option<String> {
    envs.iter()
        .rev()
        .find_map(|binding| match binding.split_once('=') {
            Some((k, v)) if k == name => Some(v.to_string()),
            _ => None,
        })
}

/// Lexical path cleaning: collapses `//` and `.`, resolves `..` without
/// touching the filesystem.
pub fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            part => parts.push(part),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Expands glob sources against the context root. Remote URLs pass through
/// untouched; a literal (wildcard-free) source that matches nothing is an
/// error, a wildcard matching nothing is silently skipped.
///
/// Returned paths are relative to `root`, like the sources were written.
pub fn resolve_sources(srcs_and_dest: &[String], root: &Path) -> Result<Vec<String>> {
    let srcs = &srcs_and_dest[..srcs_and_dest.len() - 1];
    let mut resolved = Vec::new();

    for src in srcs {
        if is_src_remote_file_url(src) {
            resolved.push(src.clone());
            continue;
        }
        // Absolute sources are relative to the source root, not the host.
        let pattern = root.join(src.trim_start_matches('/'));
        let matches: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::Context(format!("bad source pattern '{src}': {e}")))?
            .filter_map(|entry| entry.ok())
            .collect();

        if matches.is_empty() {
            if contains_wildcards(src) {
                continue;
            }
            return Err(Error::MissingSource { src: src.clone() });
        }
        for matched in matches {
            let relative = matched.strip_prefix(root).unwrap_or(&matched);
            resolved.push(relative.to_string_lossy().into_owned());
        }
    }
    Ok(resolved)
}

/// Validates the source/destination arity rules:
/// multiple literal sources, or wildcard sources that resolved to more than
/// one file, require a directory destination.
pub fn is_srcs_valid(srcs_and_dest: &[String], resolved_sources: &[String], root: &Path) -> Result<()> {
    let srcs = &srcs_and_dest[..srcs_and_dest.len() - 1];
    let dest = &srcs_and_dest[srcs_and_dest.len() - 1];

    if !srcs.iter().any(|s| contains_wildcards(s)) {
        if srcs.len() > 1 && !is_dest_dir(dest) {
            return Err(Error::Context(
                "with multiple sources the destination must be a directory and end in '/'"
                    .to_string(),
            ));
        }
        return Ok(());
    }

    if !is_dest_dir(dest) {
        let mut count = 0usize;
        for src in resolved_sources {
            if is_src_remote_file_url(src) {
                count += 1;
                continue;
            }
            let full = root.join(src.trim_start_matches('/'));
            if full.is_dir() {
                count += files_beneath(&full);
            } else {
                count += 1;
            }
            if count > 1 {
                return Err(Error::Context(
                    "wildcard sources matched multiple files; destination must be a directory and end in '/'"
                        .to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn files_beneath(dir: &Path) -> usize {
    walkdir::WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

/// Whether `dest` names a directory: trailing separator or the working dir
/// itself.
pub fn is_dest_dir(dest: &str) -> bool {
    dest.ends_with('/') || dest == "."
}

/// Maps a single source file onto its final absolute destination path.
///
/// Directory destinations receive the source basename; relative
/// destinations are anchored at `cwd`.
pub fn destination_filepath(src: &str, dest: &str, cwd: &str) -> Result<String> {
    if is_dest_dir(dest) {
        let base = Path::new(src.trim_end_matches('/'))
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let joined = if dest.starts_with('/') {
            format!("{dest}/{base}")
        } else {
            format!("{cwd}/{dest}/{base}")
        };
        return Ok(clean_path(&joined));
    }
    if dest.starts_with('/') {
        return Ok(clean_path(dest));
    }
    Ok(clean_path(&format!("{cwd}/{dest}")))
}

/// Destination for an `ADD <url>`: a non-directory destination is taken
/// literally, a directory destination receives the URL's basename.
pub fn url_destination_filepath(url: &str, dest: &str, cwd: &str) -> String {
    if !is_dest_dir(dest) {
        if dest.starts_with('/') {
            return dest.to_string();
        }
        return clean_path(&format!("{cwd}/{dest}"));
    }
    let base = url.rsplit('/').next().unwrap_or_default();
    let joined = if dest.starts_with('/') {
        format!("{dest}/{base}")
    } else {
        format!("{cwd}/{dest}/{base}")
    };
    clean_path(&joined)
}

/// Syntactic remote-URL check: `http(s)://` with a non-empty host.
pub fn is_src_remote_file_url(src: &str) -> bool {
    let rest = src
        .strip_prefix("https://")
        .or_else(|| src.strip_prefix("http://"));
    match rest {
        Some(rest) => !rest.is_empty() && !rest.starts_with('/'),
        None => false,
    }
}

/// Whether `path` contains glob metacharacters.
pub fn contains_wildcards(path: &str) -> bool {
    path.contains(['*', '?', '['])
}
