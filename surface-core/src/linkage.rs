//! Shared-library resolution for native images via the platform's `ldd`.

use crate::entry::{ExecutableKind, ResolvedEntry};
use crate::record::Aggregator;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

pub const STATIC_MARKERS: [&str; 2] = ["statically linked", "not a dynamic executable"];
pub const NOT_FOUND: &str = "not found";

/// Captured result of one inspector invocation.
#[derive(Debug, Clone, Default)]
pub struct InspectorOutput {
    pub success: bool,
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// stdout followed by stderr.
    pub text: String,
}

impl InspectorOutput {
    fn from_status(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        let mut text = String::from_utf8_lossy(stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(stderr));
        Self {
            success: status.success(),
            code: status.code(),
            text,
        }
    }

    pub fn is_static(&self) -> bool {
        STATIC_MARKERS.iter().any(|m| self.text.contains(m))
    }
}

pub trait DependencyInspector {
    /// Name used for prefix-matching the tool's own warnings, e.g. `ldd`.
    fn tool_name(&self) -> &str;

    fn inspect(&self, binary: &Path) -> io::Result<InspectorOutput>;
}

#[derive(Debug, Clone)]
pub struct Ldd {
    program: PathBuf,
    name: String,
}

impl Ldd {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| crate::config::DEFAULT_INSPECTOR.to_string());
        Self { program, name }
    }
}

impl Default for Ldd {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_INSPECTOR)
    }
}

impl DependencyInspector for Ldd {
    fn tool_name(&self) -> &str {
        &self.name
    }

    fn inspect(&self, binary: &Path) -> io::Result<InspectorOutput> {
        log::debug!("running {} {}", self.program.display(), binary.display());
        let output = Command::new(&self.program).arg(binary).output()?;
        Ok(InspectorOutput::from_status(
            output.status,
            &output.stdout,
            &output.stderr,
        ))
    }
}

/// One dependency line of inspector output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkLine {
    /// `libfoo.so.1 => /usr/lib/libfoo.so.1 (0x...)` or a bare
    /// `/lib64/ld-linux-x86-64.so.2 (0x...)`, where the label is the path.
    Path { label: String, path: String },
    /// `libfoo.so.1 => not found`
    Missing { label: String },
    /// A line prefixed with the tool's own name.
    Warning(String),
}

/// Parses inspector output, dropping lines that name no library on disk
/// (virtual objects such as `linux-vdso.so.1`, headers, blanks).
pub fn parse_output(text: &str, tool_name: &str) -> Vec<LinkLine> {
    let warning_prefix = format!("{tool_name}:");
    let mut lines = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with(&warning_prefix) {
            lines.push(LinkLine::Warning(line.to_string()));
            continue;
        }

        if let Some((left, right)) = line.split_once("=>") {
            let label = left.trim().to_string();
            if right.contains(NOT_FOUND) {
                lines.push(LinkLine::Missing { label });
            } else if let Some(path) = right.split_whitespace().find(|f| f.starts_with('/')) {
                lines.push(LinkLine::Path {
                    label,
                    path: path.to_string(),
                });
            }
            continue;
        }

        if let Some(path) = line.split_whitespace().next().filter(|f| f.starts_with('/')) {
            lines.push(LinkLine::Path {
                label: path.to_string(),
                path: path.to_string(),
            });
        }
    }

    lines
}

/// Verdict for one native image.
#[derive(Debug, Clone)]
pub struct Linkage {
    pub kind: ExecutableKind,
    /// Library leaves for the nested report.
    pub libraries: Vec<ResolvedEntry>,
    /// First failure, mirrored from the flat report.
    pub error: Option<String>,
}

impl Linkage {
    fn failed(error: String) -> Self {
        Self {
            kind: ExecutableKind::DynamicBinary,
            libraries: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkTally {
    pub resolved: usize,
    pub missing: usize,
    pub warnings: usize,
}

/// Runs the inspector on `binary` and records its verdict.
pub fn resolve<I: DependencyInspector + ?Sized>(
    inspector: &I,
    binary: &Path,
    header: Option<&str>,
    report: &mut Aggregator,
) -> Linkage {
    let shown = binary.display();
    let linkage = format!("file.linkage:{shown}");
    let what = header.unwrap_or("ELF image");

    let output = match inspector.inspect(binary) {
        Ok(output) => output,
        Err(e) => {
            let error = format!(
                "Unable to run {} on {shown}: {e}",
                inspector.tool_name()
            );
            report.fail(linkage, error.clone());
            return Linkage::failed(error);
        }
    };

    if output.is_static() {
        report.pass(linkage, format!("{shown} is statically linked ({what})"));
        return Linkage {
            kind: ExecutableKind::StaticBinary,
            libraries: Vec::new(),
            error: None,
        };
    }

    if !output.success && output.text.trim().is_empty() {
        let error = match output.code {
            Some(code) => format!(
                "{} exited with status {code} and no output for {shown}",
                inspector.tool_name()
            ),
            None => format!(
                "{} was terminated by a signal while inspecting {shown}",
                inspector.tool_name()
            ),
        };
        report.fail(linkage, error.clone());
        return Linkage::failed(error);
    }

    let lines = parse_output(&output.text, inspector.tool_name());
    let mut tally = LinkTally::default();
    let mut leaves = Vec::new();
    let mut first_error = None;

    let note = match (output.success, output.code) {
        (true, _) => String::new(),
        (false, Some(code)) => format!("; {} exited with status {code}", inspector.tool_name()),
        (false, None) => format!("; {} was terminated by a signal", inspector.tool_name()),
    };
    report.pass(
        linkage,
        format!("{shown} is dynamically linked ({what}){note}"),
    );

    for line in lines {
        match line {
            LinkLine::Warning(text) => {
                log::debug!("{shown}: {text}");
                tally.warnings += 1;
            }
            LinkLine::Missing { label } => {
                tally.missing += 1;
                let error = format!("{label} => {NOT_FOUND}");
                report.fail(format!("ldd:{shown}:{label}"), error.clone());
                first_error.get_or_insert_with(|| error.clone());
                leaves.push(ResolvedEntry::failed(label, error));
            }
            LinkLine::Path { label, path } => {
                if Path::new(&path).exists() {
                    tally.resolved += 1;
                    leaves.push(ResolvedEntry::new(path));
                } else {
                    tally.missing += 1;
                    let error = format!("{label} {NOT_FOUND} (expected at {path})");
                    report.fail(format!("ldd:{shown}:{label}"), error.clone());
                    first_error.get_or_insert_with(|| error.clone());
                    leaves.push(ResolvedEntry::failed(path, error));
                }
            }
        }
    }

    let summary = format!("ldd.summary:{shown}");
    if tally.missing == 0 {
        report.pass(
            summary,
            format!("All {} libraries resolved", tally.resolved),
        );
    } else {
        report.fail(
            summary,
            format!(
                "missing {}, resolved {}",
                tally.missing, tally.resolved
            ),
        );
    }

    if tally.warnings > 0 {
        report.skip(
            format!("ldd.warnings:{shown}"),
            format!(
                "Ignored {} {} warning line(s)",
                tally.warnings,
                inspector.tool_name()
            ),
        );
    }

    Linkage {
        kind: ExecutableKind::DynamicBinary,
        libraries: leaves,
        error: first_error,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Status;
    use std::collections::HashMap;

    /// Inspector that replays canned output per binary path.
    #[derive(Default)]
    pub(crate) struct Scripted {
        pub replies: HashMap<PathBuf, InspectorOutput>,
    }

    impl Scripted {
        pub fn reply(mut self, path: &Path, success: bool, text: &str) -> Self {
            self.replies.insert(
                path.to_path_buf(),
                InspectorOutput {
                    success,
                    code: Some(if success { 0 } else { 1 }),
                    text: text.to_string(),
                },
            );
            self
        }
    }

    impl DependencyInspector for Scripted {
        fn tool_name(&self) -> &str {
            "ldd"
        }

        fn inspect(&self, binary: &Path) -> io::Result<InspectorOutput> {
            self.replies
                .get(binary)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "ldd: not installed"))
        }
    }

    const GLIBC_OUTPUT: &str = "\tlinux-vdso.so.1 (0x00007ffc6a5f2000)
\tlibfoo.so.1 => not found
\tlibc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f2a1c200000)
\t/lib64/ld-linux-x86-64.so.2 (0x00007f2a1c4a0000)
";

    #[test]
    fn parses_glibc_style_output() {
        let lines = parse_output(GLIBC_OUTPUT, "ldd");
        assert_eq!(
            lines,
            vec![
                LinkLine::Missing {
                    label: "libfoo.so.1".into()
                },
                LinkLine::Path {
                    label: "libc.so.6".into(),
                    path: "/lib/x86_64-linux-gnu/libc.so.6".into()
                },
                LinkLine::Path {
                    label: "/lib64/ld-linux-x86-64.so.2".into(),
                    path: "/lib64/ld-linux-x86-64.so.2".into()
                },
            ]
        );
    }

    #[test]
    fn not_found_wins_over_path_token() {
        let lines = parse_output("libx.so => /opt/libx.so not found", "ldd");
        assert_eq!(lines, vec![LinkLine::Missing { label: "libx.so".into() }]);
    }

    #[test]
    fn tool_warnings_are_separate() {
        let text = "ldd: warning: you do not have execution permission for `./a'\n\tlibc.so.6 => /lib/libc.so.6 (0x1)\n";
        let lines = parse_output(text, "ldd");
        assert!(matches!(lines[0], LinkLine::Warning(_)));
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn static_binary_has_no_library_records() {
        let bin = Path::new("/bin/busybox");
        let ldd = Scripted::default().reply(bin, false, "\tnot a dynamic executable\n");
        let mut report = Aggregator::new();

        let linkage = resolve(&ldd, bin, None, &mut report);
        let report = report.finish();

        assert_eq!(linkage.kind, ExecutableKind::StaticBinary);
        assert!(linkage.libraries.is_empty());
        assert!(linkage.error.is_none());
        assert_eq!(report.total, 1);
        let record = report.find("file.linkage:/bin/busybox").unwrap();
        assert_eq!(record.status, Status::Passed);
        assert!(record.message.contains("statically linked"));
    }

    #[test]
    fn missing_library_is_reported_and_rolled_up() {
        let dir = tempfile::tempdir().unwrap();
        let libc = dir.path().join("libc.so.6");
        std::fs::write(&libc, b"").unwrap();
        let text = format!(
            "\tlibfoo.so.1 => not found\n\tlibc.so.6 => {} (0x1)\n",
            libc.display()
        );
        let bin = Path::new("/app/bin/tool");
        let ldd = Scripted::default().reply(bin, true, &text);
        let mut report = Aggregator::new();

        let linkage = resolve(&ldd, bin, None, &mut report);
        let report = report.finish();

        assert_eq!(linkage.kind, ExecutableKind::DynamicBinary);
        assert_eq!(linkage.libraries.len(), 2);
        assert!(linkage.error.is_some());
        let missing = report.find("ldd:/app/bin/tool:libfoo.so.1").unwrap();
        assert_eq!(missing.status, Status::Failed);
        let summary = report.find("ldd.summary:/app/bin/tool").unwrap();
        assert_eq!(summary.status, Status::Failed);
        assert!(summary.message.contains("missing 1"));
        assert_eq!(report.failed, 2);
    }

    #[test]
    fn vanished_library_path_names_expected_location() {
        let bin = Path::new("/app/bin/tool");
        let ldd = Scripted::default().reply(
            bin,
            true,
            "\tlibgone.so.2 => /nonexistent/libgone.so.2 (0x1)\n",
        );
        let mut report = Aggregator::new();
        resolve(&ldd, bin, None, &mut report);
        let report = report.finish();

        let record = report.find("ldd:/app/bin/tool:libgone.so.2").unwrap();
        assert!(record.message.contains("expected at /nonexistent/libgone.so.2"));
    }

    #[test]
    fn warnings_only_output_is_not_fatal() {
        let bin = Path::new("/app/bin/odd");
        let ldd = Scripted::default().reply(bin, false, "ldd: ./odd: some complaint\n");
        let mut report = Aggregator::new();
        resolve(&ldd, bin, None, &mut report);
        let report = report.finish();

        assert_eq!(report.failed, 0);
        assert_eq!(
            report.find("ldd.warnings:/app/bin/odd").unwrap().status,
            Status::Skipped
        );
    }

    #[test]
    fn unavailable_inspector_fails_linkage() {
        let bin = Path::new("/app/bin/tool");
        let mut report = Aggregator::new();
        let linkage = resolve(&Scripted::default(), bin, None, &mut report);
        let report = report.finish();

        assert!(linkage.error.unwrap().contains("Unable to run ldd"));
        assert_eq!(report.failed, 1);
        assert_eq!(
            report.find("file.linkage:/app/bin/tool").unwrap().status,
            Status::Failed
        );
    }

    #[test]
    fn silent_failure_fails_linkage() {
        let bin = Path::new("/app/bin/tool");
        let ldd = Scripted::default().reply(bin, false, "");
        let mut report = Aggregator::new();
        resolve(&ldd, bin, None, &mut report);
        assert_eq!(report.finish().failed, 1);
    }
}
