use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FetchError, FetchResult};
use crate::model::resource::Resource;

const HEADER: [&str; 2] = [
    "# THIS FILE IS AUTOMATICALLY-GENERATED",
    "# DO NOT ADD ANYTHING OTHER THAN `start` LINES",
];
const LINE_END: &str = "\r\n";

static START_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^start +(\S+)").expect("valid start line regex"));

/// Resource names from the `start <name>` lines of a registry file.
/// A missing file reads as an empty registry.
pub fn read_names(path: &Path) -> FetchResult<Vec<String>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(FetchError::Registry {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    Ok(parse_names(&text))
}

pub fn parse_names(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| START_LINE_RE.captures(line))
        .map(|captures| captures[1].to_string())
        .collect()
}

/// Rewrite `path` from scratch with the generated header and one line per name.
pub fn write_names(path: &Path, names: &[String]) -> FetchResult<()> {
    fs::write(path, render_names(names)).map_err(|source| FetchError::Registry {
        path: path.to_path_buf(),
        source,
    })
}

pub fn render_names(names: &[String]) -> String {
    let mut text = String::new();
    for line in HEADER {
        text.push_str(line);
        text.push_str(LINE_END);
    }
    for name in names {
        text.push_str("start ");
        text.push_str(name);
        text.push_str(LINE_END);
    }
    text
}

/// Keep `existing` as is and append, in order, each resource name not yet present.
pub fn merge(existing: Vec<String>, resources: &[Resource]) -> Vec<String> {
    let mut seen: HashSet<String> = existing.iter().cloned().collect();
    let mut names = existing;

    for resource in resources {
        if seen.insert(resource.name.clone()) {
            names.push(resource.name.clone());
        }
    }

    names
}
