//! Compact per-binary view of a report, for posting where space is short.

use crate::record::{CheckRecord, Report, Status};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Message fragments that name a missing filesystem entry, as
/// `(prefix, terminator)`; an empty terminator runs to whitespace.
const PATH_PATTERNS: [(&str, &str); 5] = [
    ("File ", " does not exist"),
    ("Directory ", " does not exist"),
    ("expected at ", ""),
    ("Interpreter ", " not found"),
    ("Unable to read file header for ", ""),
];

const FOUND_AT: &str = "Found at ";

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    #[serde(flatten)]
    pub report: Report,
    pub summarised: bool,
}

#[derive(Debug, Default)]
struct BinarySummary {
    status: Option<Status>,
    message: String,
    resolved_path: Option<String>,
    additional: Vec<String>,
    missing_libs: Vec<(String, Option<String>)>,
}

impl BinarySummary {
    fn into_record(self, name: &str) -> CheckRecord {
        let status = self.status.unwrap_or(Status::Skipped);
        let mut lines = Vec::new();
        match (&self.resolved_path, status) {
            (Some(path), Status::Passed) => lines.push(format!("{FOUND_AT}{path}")),
            _ if !self.message.trim().is_empty() => lines.push(self.message.trim().to_string()),
            _ => {}
        }
        lines.extend(self.additional);
        if !self.missing_libs.is_empty() {
            lines.push("Missing libraries:".to_string());
            for (lib, path) in self.missing_libs {
                match path {
                    Some(path) => lines.push(format!("- {lib} (expected at {path})")),
                    None => lines.push(format!("- {lib}")),
                }
            }
        }
        CheckRecord::new(name, status, lines.join("\n"))
    }
}

/// Folds per-check records into one record per declared binary plus, when
/// anything is missing on disk, a `missing-paths` record drawing the
/// missing entries as a tree.
pub fn summarise(report: &Report) -> Summary {
    let mut binaries: BTreeMap<String, BinarySummary> = BTreeMap::new();
    let mut missing: BTreeSet<String> = BTreeSet::new();

    for record in &report.tests {
        let failed = record.status == Status::Failed;
        if failed {
            missing.extend(extract_paths(&record.message));
        }

        if let Some(name) = record.name.strip_prefix("deploy_bin:") {
            let binary = binaries.entry(name.to_string()).or_default();
            binary.status = Some(record.status);
            binary.message = record.message.clone();
            binary.resolved_path = record
                .message
                .strip_prefix(FOUND_AT)
                .map(|p| p.trim().to_string());
            continue;
        }

        if !failed {
            continue;
        }

        if let Some(rest) = record.name.strip_prefix("ldd:") {
            let Some((binary_path, lib)) = rest.rsplit_once(':') else {
                continue;
            };
            if let Some(name) = owner_of(binary_path, &binaries) {
                let path = extract_paths(&record.message).into_iter().next();
                if let Some(binary) = binaries.get_mut(&name) {
                    binary.missing_libs.push((lib.to_string(), path));
                }
            }
            continue;
        }

        let file_path = record
            .name
            .strip_prefix("file.exists:")
            .or_else(|| record.name.strip_prefix("file.executable:"));
        if let Some(file_path) = file_path {
            if let Some(name) = owner_of(file_path, &binaries) {
                if let Some(binary) = binaries.get_mut(&name) {
                    binary.additional.push(record.message.trim().to_string());
                }
            }
        }
    }

    let mut tests: Vec<CheckRecord> = binaries
        .into_iter()
        .map(|(name, binary)| binary.into_record(&name))
        .collect();

    let tree = render_tree(&missing);
    if !tree.is_empty() {
        tests.push(CheckRecord::new(
            "missing-paths",
            Status::Failed,
            format!("Missing filesystem entries:\n{}", tree.join("\n")),
        ));
    }

    Summary {
        report: Report::from_records(tests),
        summarised: true,
    }
}

/// The declared binary a checked path belongs to, by exact resolved path or
/// by matching file name.
fn owner_of(path: &str, binaries: &BTreeMap<String, BinarySummary>) -> Option<String> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    binaries
        .iter()
        .find(|(_, b)| b.resolved_path.as_deref() == Some(path))
        .or_else(|| {
            binaries.iter().find(|(_, b)| {
                b.resolved_path
                    .as_deref()
                    .is_some_and(|r| r.rsplit('/').next() == Some(file_name))
            })
        })
        .map(|(name, _)| name.clone())
}

fn extract_paths(message: &str) -> Vec<String> {
    let mut found = Vec::new();
    for (prefix, terminator) in PATH_PATTERNS {
        let mut rest = message;
        while let Some(idx) = rest.find(prefix) {
            rest = &rest[idx + prefix.len()..];
            let candidate = if terminator.is_empty() {
                rest.split_whitespace().next().unwrap_or("")
            } else {
                match rest.find(terminator) {
                    Some(end) => &rest[..end],
                    None => continue,
                }
            };
            let cleaned = candidate.trim().trim_end_matches(['.', ')', ':']);
            if cleaned.contains('/') && !cleaned.contains(char::is_whitespace) {
                found.push(cleaned.to_string());
            }
        }
    }
    found
}

#[derive(Default)]
struct Node(BTreeMap<String, Node>);

fn render_tree(paths: &BTreeSet<String>) -> Vec<String> {
    let mut roots = Node::default();
    for path in paths {
        let root = if path.starts_with('/') { "/" } else { "." };
        let mut node = roots.0.entry(root.to_string()).or_default();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            node = node.0.entry(part.to_string()).or_default();
        }
    }

    let mut lines = Vec::new();
    for (root, children) in &roots.0 {
        lines.push(root.clone());
        render_children(children, "", &mut lines);
    }
    lines
}

fn render_children(node: &Node, prefix: &str, lines: &mut Vec<String>) {
    let count = node.0.len();
    for (i, (name, child)) in node.0.iter().enumerate() {
        let last = i + 1 == count;
        let connector = if last { "`--" } else { "|--" };
        lines.push(format!("{prefix}{connector} {name}"));
        let extension = if last { "    " } else { "|   " };
        render_children(child, &format!("{prefix}{extension}"), lines);
    }
}
