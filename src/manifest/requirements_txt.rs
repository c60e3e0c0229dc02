use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{Location, ManifestError};
use crate::manifest::RequirementRecord;
use crate::manifest::requirement::parse_requirement;

pub fn read_requirements(path: &Path) -> Result<Vec<RequirementRecord>, ManifestError> {
    let text = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_requirements(&text, path)
}

/// One requirement per logical line. Blank lines, `#` comments and pip option
/// lines (`-r`, `--index-url`, `-e`, ...) contribute nothing.
pub fn parse_requirements(text: &str, path: &Path) -> Result<Vec<RequirementRecord>, ManifestError> {
    let mut out = Vec::new();
    for (line_no, line) in logical_lines(text) {
        let line = strip_comment(&line).trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('-') {
            debug!(path = %path.display(), line = line_no, option = line, "skipping pip option line");
            continue;
        }
        let record = parse_requirement(line)
            .map_err(|msg| ManifestError::parse(path, Location::Line(line_no), msg))?;
        out.push(record);
    }
    Ok(out)
}

// Joins `\`-continued physical lines; each logical line keeps the number of its first physical line.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (idx, raw) in text.lines().enumerate() {
        let (start, mut buf) = pending.take().unwrap_or((idx + 1, String::new()));
        match raw.trim_end().strip_suffix('\\') {
            Some(head) => {
                buf.push_str(head);
                buf.push(' ');
                pending = Some((start, buf));
            }
            None => {
                buf.push_str(raw);
                out.push((start, buf));
            }
        }
    }
    if let Some(last) = pending {
        out.push(last);
    }
    out
}

// `#` starts a comment at line start or after whitespace; `pkg#egg` URL fragments survive.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}
