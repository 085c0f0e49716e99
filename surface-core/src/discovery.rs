use crate::record::CheckRecord;
use crate::Status;
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Any of the owner, group or other execute bits; a group-only `x` counts.
pub const EXEC_BITS: u32 = 0o111;

/// Outcome of turning a declared name into a concrete file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(PathBuf),
    /// The name was path-like but nothing lives there.
    NoSuchFile(String),
    /// A bare name that no search-path directory provides.
    NotOnSearchPath(String),
}

impl Lookup {
    pub fn describe_failure(&self) -> Option<String> {
        match self {
            Lookup::Found(_) => None,
            Lookup::NoSuchFile(name) => Some(format!("File {name} does not exist")),
            Lookup::NotOnSearchPath(name) => Some(format!("{name} not found on PATH")),
        }
    }
}

fn is_path_like(name: &str) -> bool {
    name.contains('/') || name.starts_with('.')
}

/// Resolves a declared binary or interpreter token.
///
/// Path-like names are used as-is when a regular file exists there; any
/// other name is looked up in `search_path`, where only executable regular
/// files match.
pub fn resolve_executable(name: &str, search_path: &[PathBuf]) -> Lookup {
    if is_path_like(name) {
        let candidate = Path::new(name);
        if candidate.is_file() {
            return Lookup::Found(absolute(candidate));
        }
        if name.contains('/') {
            return Lookup::NoSuchFile(name.to_string());
        }
    }

    search_path
        .iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable_file(candidate))
        .map(|found| Lookup::Found(absolute(&found)))
        .unwrap_or_else(|| Lookup::NotOnSearchPath(name.to_string()))
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Regular file (after following symlinks) with an execute bit set.
pub fn is_executable_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & EXEC_BITS != 0)
        .unwrap_or(false)
}

#[derive(Debug, Default)]
pub struct Discovery {
    /// Paths to traverse with the label each is reported under.
    pub entries: Vec<(String, PathBuf)>,
    pub records: Vec<CheckRecord>,
}

impl Discovery {
    fn add(&mut self, seen: &mut HashSet<PathBuf>, label: String, path: PathBuf) {
        if seen.insert(path.clone()) {
            self.entries.push((label, path));
        } else {
            log::debug!("{} already declared; not traversing twice", path.display());
        }
    }
}

/// Expands declared binaries and directories into concrete entry points.
pub fn discover(
    bins: &[String],
    dirs: &[PathBuf],
    max_files_per_dir: Option<usize>,
    search_path: &[PathBuf],
) -> Discovery {
    let mut out = Discovery::default();
    let mut seen = HashSet::new();

    for name in bins {
        let subject = format!("deploy_bin:{name}");
        match resolve_executable(name, search_path) {
            Lookup::Found(path) => {
                out.records.push(CheckRecord::new(
                    subject,
                    Status::Passed,
                    format!("Found at {}", path.display()),
                ));
                out.add(&mut seen, name.clone(), path);
            }
            failure => {
                let message = failure.describe_failure().unwrap_or_default();
                out.records
                    .push(CheckRecord::new(subject, Status::Failed, message));
            }
        }
    }

    for dir in dirs {
        scan_dir(dir, max_files_per_dir, &mut out, &mut seen);
    }

    out
}

fn scan_dir(
    dir: &Path,
    cap: Option<usize>,
    out: &mut Discovery,
    seen: &mut HashSet<PathBuf>,
) {
    let subject = format!("deploy_dir:{}", dir.display());
    if !dir.is_dir() {
        let message = if dir.exists() {
            format!("{} is not a directory", dir.display())
        } else {
            format!("Directory {} does not exist", dir.display())
        };
        out.records
            .push(CheckRecord::new(subject, Status::Failed, message));
        return;
    }
    out.records.push(CheckRecord::new(
        subject,
        Status::Passed,
        format!("Directory {} exists", dir.display()),
    ));

    let scan = format!("deploy_dir.scan:{}", dir.display());
    let mut candidates = match list_executables(dir) {
        Ok(candidates) => candidates,
        Err(e) => {
            out.records.push(CheckRecord::new(
                scan,
                Status::Failed,
                format!("Unable to list {}: {e}", dir.display()),
            ));
            return;
        }
    };
    candidates.sort();

    let available = candidates.len();
    let limit = cap.unwrap_or(usize::MAX);
    let root = absolute(dir);
    for path in candidates.into_iter().take(limit) {
        let label = root.join(path.file_name().unwrap_or_default());
        out.add(seen, label.display().to_string(), label);
    }

    if available > limit {
        log::warn!(
            "{}: checking {limit} of {available} executables",
            dir.display()
        );
        out.records.push(CheckRecord::new(
            scan,
            Status::Skipped,
            format!(
                "Checked {limit} of {available} executables in {}; enumeration truncated at the per-directory limit",
                dir.display()
            ),
        ));
    } else {
        out.records.push(CheckRecord::new(
            scan,
            Status::Passed,
            format!("Checked {available} executables in {}", dir.display()),
        ));
    }
}

/// Immediate children that are executable files or symlinks to them.
fn list_executables(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_executable_file(&path) {
            found.push(path);
        }
    }
    Ok(found)
}
