use crate::config::ValidatorConfig;
use crate::discovery::{self, resolve_executable, Lookup, EXEC_BITS};
use crate::entry::{ExecutableKind, ResolvedEntry, TreeReport};
use crate::header::{self, FileClass, Header};
use crate::launch::{self, Launched};
use crate::linkage::{self, DependencyInspector};
use crate::record::{Aggregator, Report};
use crate::script::{self, Shebang};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Everything a run produces.
#[derive(Debug)]
pub struct Outcome {
    pub report: Report,
    pub tree: TreeReport,
}

/// Validates the whole deploy surface described by `config`.
pub fn validate<I: DependencyInspector + ?Sized>(config: &ValidatorConfig, inspector: &I) -> Outcome {
    let mut traversal = Traversal::new(config, inspector);
    traversal.report.extend(config.input_records.iter().cloned());

    let found = discovery::discover(
        &config.deploy_bins,
        &config.deploy_dirs,
        config.max_files_per_dir,
        &config.search_path,
    );
    traversal.report.extend(found.records);

    let mut tree = TreeReport {
        deploy_bins: config.deploy_bins.clone(),
        deploy_paths: config
            .deploy_dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect(),
        ..Default::default()
    };

    for (label, path) in found.entries {
        let mut entry = traversal.visit(&path);
        let runnable = matches!(
            entry.kind,
            Some(ExecutableKind::Script | ExecutableKind::StaticBinary | ExecutableKind::DynamicBinary)
        );
        if config.capture_output && runnable && entry.is_clean() {
            traversal.launch(&path, &mut entry);
        }
        tree.executables.insert(label, entry);
    }

    let report = traversal.report.finish();
    log::info!(
        "{} checks: {} passed, {} failed, {} skipped",
        report.total,
        report.passed,
        report.failed,
        report.skipped
    );
    Outcome { report, tree }
}

/// Depth-first walk over entry points and their interpreter chains.
///
/// Each path is processed at most once per run; later references reuse the
/// finished subtree without emitting records again.
pub struct Traversal<'a, I: DependencyInspector + ?Sized> {
    config: &'a ValidatorConfig,
    inspector: &'a I,
    visited: HashSet<PathBuf>,
    finished: HashMap<PathBuf, ResolvedEntry>,
    report: Aggregator,
}

impl<'a, I: DependencyInspector + ?Sized> Traversal<'a, I> {
    pub fn new(config: &'a ValidatorConfig, inspector: &'a I) -> Self {
        Self {
            config,
            inspector,
            visited: HashSet::new(),
            finished: HashMap::new(),
            report: Aggregator::new(),
        }
    }

    pub fn into_report(self) -> Report {
        self.report.finish()
    }

    pub fn visit(&mut self, path: &Path) -> ResolvedEntry {
        if path.as_os_str().is_empty() {
            return ResolvedEntry::default();
        }
        if let Some(done) = self.finished.get(path) {
            return done.clone();
        }
        if !self.visited.insert(path.to_path_buf()) {
            log::debug!("{} is already being resolved; stopping here", path.display());
            return ResolvedEntry {
                path: path.display().to_string(),
                cyclic: true,
                ..Default::default()
            };
        }

        log::debug!("visiting {}", path.display());
        let entry = self.sniff(path);
        self.finished.insert(path.to_path_buf(), entry.clone());
        entry
    }

    fn sniff(&mut self, path: &Path) -> ResolvedEntry {
        let shown = path.display().to_string();
        let mut entry = ResolvedEntry::new(shown.clone());

        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                let error = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("File {shown} does not exist")
                } else {
                    format!("Unable to stat {shown}: {e}")
                };
                self.report.fail(format!("file.exists:{shown}"), error.clone());
                entry.set_error(error);
                return entry;
            }
        };

        if meta.is_dir() {
            self.report.skip(
                format!("file.directory:{shown}"),
                format!("{shown} is a directory, not an executable"),
            );
            return entry;
        }
        self.report
            .pass(format!("file.exists:{shown}"), format!("File {shown} exists"));

        let mode = meta.permissions().mode();
        if mode & EXEC_BITS == 0 {
            let error = format!("File {shown} is not executable (mode {:o})", mode & 0o7777);
            self.report.fail(format!("file.executable:{shown}"), error.clone());
            entry.set_error(error);
            return entry;
        }
        self.report.pass(
            format!("file.executable:{shown}"),
            format!("File {shown} is executable"),
        );

        let target = link_target(path);
        let block = match header::read_block(&target) {
            Ok(block) => block,
            Err(e) => {
                let error = format!("Unable to read file header for {shown}: {e}");
                self.report.fail(format!("file.read:{shown}"), error.clone());
                entry.set_error(error);
                return entry;
            }
        };

        match header::classify(&block) {
            FileClass::Elf(summary) => {
                let described = summary.as_ref().map(|s| {
                    if s.is_executable() {
                        s.describe()
                    } else {
                        log::warn!("{shown} is an ELF image but not a program");
                        format!("{}, not a program image", s.describe())
                    }
                });
                let linkage = linkage::resolve(
                    self.inspector,
                    path,
                    described.as_deref(),
                    &mut self.report,
                );
                entry.kind = Some(linkage.kind);
                entry.dependencies = linkage.libraries;
                entry.error = linkage.error;
            }
            FileClass::Script(line) => {
                entry.kind = Some(ExecutableKind::Script);
                self.resolve_script(path, &line, &mut entry);
            }
            FileClass::Unknown => {
                entry.kind = Some(ExecutableKind::Unknown);
                self.report.skip(
                    format!("file.type:{shown}"),
                    format!("{shown} is neither an ELF image nor a script"),
                );
            }
        }

        entry
    }

    fn resolve_script(&mut self, path: &Path, line: &str, entry: &mut ResolvedEntry) {
        let shown = path.display();
        let Some(shebang) = Shebang::parse(line) else {
            let error = format!("Empty interpreter directive in {shown}");
            self.report.fail(format!("script:{shown}"), error.clone());
            entry.set_error(error);
            return;
        };
        self.report
            .pass(format!("script:{shown}"), shebang.describe());

        let interpreter = match self.lookup(
            &shebang.interpreter,
            format!("script.interpreter:{shown}"),
            entry,
        ) {
            Some(found) => found,
            None => return,
        };
        let dep = self.visit(&interpreter);
        entry.dependencies.push(dep);

        if !script::is_launcher(&interpreter) {
            return;
        }

        let subject = format!("script.env_target:{shown}");
        let Some(target) = shebang.launcher_target() else {
            let error = format!(
                "{} in {shown} names no program to run",
                interpreter.display()
            );
            self.report.fail(subject, error.clone());
            entry.set_error(error);
            return;
        };
        if let Some(found) = self.lookup(target, subject, entry) {
            let dep = self.visit(&found);
            entry.dependencies.push(dep);
        }
    }

    /// Resolves an interpreter token, recording the outcome under `subject`.
    fn lookup(
        &mut self,
        token: &str,
        subject: String,
        entry: &mut ResolvedEntry,
    ) -> Option<PathBuf> {
        match resolve_executable(token, &self.config.search_path) {
            Lookup::Found(found) => {
                self.report.pass(
                    subject,
                    format!("Interpreter {token} resolved to {}", found.display()),
                );
                Some(found)
            }
            _ => {
                let error = format!("Interpreter {token} not found");
                self.report.fail(subject, error.clone());
                entry.dependencies.push(ResolvedEntry::failed(token, error.clone()));
                entry.set_error(error);
                None
            }
        }
    }

    fn launch(&mut self, path: &Path, entry: &mut ResolvedEntry) {
        let shown = path.display();
        let subject = format!("exec:{shown}");
        let timeout = self.config.launch_timeout;

        match launch::launch(path, timeout) {
            Ok(Launched::Exited { status, output }) => {
                if status.success() {
                    self.report.pass(subject, format!("{shown} exited successfully"));
                } else {
                    let error = format!("{shown} exited with {status}");
                    self.report.fail(subject, error.clone());
                    entry.set_error(error);
                }
                entry.output = Some(output);
            }
            Ok(Launched::TimedOut { output }) => {
                let error = format!("{shown} did not exit within {}s", timeout.as_secs_f32());
                self.report.fail(subject, error.clone());
                entry.set_error(error);
                entry.output = Some(output);
            }
            Err(e) => {
                let error = format!("Unable to run {shown}: {e:#}");
                self.report.fail(subject, error.clone());
                entry.set_error(error);
            }
        }
    }
}

/// Follows one level of symlink; the result is used for reading only.
fn link_target(path: &Path) -> PathBuf {
    match fs::read_link(path) {
        Ok(target) if target.is_absolute() => target,
        Ok(target) => path
            .parent()
            .map(|dir| dir.join(&target))
            .unwrap_or(target),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linkage::tests::Scripted;
    use crate::Status;
    use std::os::unix::fs::symlink;

    const STATIC: &str = "\tnot a dynamic executable\n";

    fn elf_stub(path: &Path) {
        elf_stub_of_type(path, 2);
    }

    fn elf_stub_of_type(path: &Path, e_type: u16) {
        let mut h = vec![0u8; 64];
        h[..4].copy_from_slice(&crate::header::elf::ELF_MAGIC);
        h[4] = 2;
        h[5] = 1;
        h[6] = 1;
        h[16..18].copy_from_slice(&e_type.to_le_bytes());
        h[18..20].copy_from_slice(&62u16.to_le_bytes());
        fs::write(path, h).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn write_exec(path: &Path, body: &str) {
        fs::write(path, body).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn config(bins: &[String], search: &Path) -> ValidatorConfig {
        ValidatorConfig {
            deploy_bins: bins.to_vec(),
            search_path: vec![search.to_path_buf()],
            ..Default::default()
        }
    }

    fn status_of(report: &Report, name: &str) -> Status {
        report
            .find(name)
            .unwrap_or_else(|| panic!("no record {name} in {:#?}", report.tests))
            .status
    }

    #[test]
    fn ghost_tool_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = validate(&config(&["ghost-tool".into()], dir.path()), &Scripted::default());

        assert_eq!(status_of(&outcome.report, "deploy_bin:ghost-tool"), Status::Failed);
        assert_ne!(outcome.report.exit_code(), 0);
        assert!(outcome.tree.executables.is_empty());
    }

    #[test]
    fn static_binary_passes_without_library_records() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("busybox");
        elf_stub(&bin);
        let ldd = Scripted::default().reply(&bin, false, STATIC);

        let outcome = validate(&config(&["busybox".into()], dir.path()), &ldd);
        let report = &outcome.report;

        let linkage = report.find(&format!("file.linkage:{}", bin.display())).unwrap();
        assert_eq!(linkage.status, Status::Passed);
        assert!(linkage.message.contains("statically linked"));
        assert!(report.tests.iter().all(|r| !r.name.starts_with("ldd")));
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            outcome.tree.executables["busybox"].kind,
            Some(ExecutableKind::StaticBinary)
        );
    }

    #[test]
    fn missing_shared_library_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("tool");
        elf_stub(&bin);
        let ldd = Scripted::default().reply(&bin, true, "\tlibfoo.so.1 => not found\n");

        let outcome = validate(&config(&["tool".into()], dir.path()), &ldd);
        let report = &outcome.report;
        let shown = bin.display();

        assert_eq!(status_of(report, &format!("ldd:{shown}:libfoo.so.1")), Status::Failed);
        let summary = report.find(&format!("ldd.summary:{shown}")).unwrap();
        assert_eq!(summary.status, Status::Failed);
        assert!(summary.message.contains("missing 1"));
        assert_eq!(report.exit_code(), 1);
        assert!(outcome.tree.executables["tool"].error.is_some());
    }

    #[test]
    fn env_script_validates_launcher_and_target() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        let python = dir.path().join("python3");
        let app = dir.path().join("app");
        elf_stub(&env);
        elf_stub(&python);
        write_exec(&app, &format!("#!{} python3\nprint('hi')\n", env.display()));
        let ldd = Scripted::default()
            .reply(&env, false, STATIC)
            .reply(&python, false, STATIC);

        let outcome = validate(&config(&["app".into()], dir.path()), &ldd);
        let report = &outcome.report;
        let shown = app.display();

        assert_eq!(status_of(report, &format!("script:{shown}")), Status::Passed);
        assert_eq!(status_of(report, &format!("script.interpreter:{shown}")), Status::Passed);
        assert_eq!(status_of(report, &format!("script.env_target:{shown}")), Status::Passed);
        assert_eq!(
            status_of(report, &format!("file.linkage:{}", python.display())),
            Status::Passed
        );
        assert_eq!(report.failed, 0);

        let tree = &outcome.tree.executables["app"];
        assert_eq!(tree.kind, Some(ExecutableKind::Script));
        let deps: Vec<_> = tree.dependencies.iter().map(|d| d.path.clone()).collect();
        assert_eq!(deps, vec![env.display().to_string(), python.display().to_string()]);
    }

    #[test]
    fn missing_interpreter_keeps_shebang_record_passed() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        write_exec(&app, "#!/nonexistent/bin/ruby\n");

        let outcome = validate(&config(&["app".into()], dir.path()), &Scripted::default());
        let report = &outcome.report;
        let shown = app.display();

        assert_eq!(status_of(report, &format!("script:{shown}")), Status::Passed);
        let interp = report.find(&format!("script.interpreter:{shown}")).unwrap();
        assert_eq!(interp.status, Status::Failed);
        assert!(interp.message.contains("Interpreter /nonexistent/bin/ruby not found"));
    }

    #[test]
    fn group_execute_bit_passes_executable_check() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("tool");
        elf_stub(&bin);
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o610)).unwrap();
        let ldd = Scripted::default().reply(&bin, false, STATIC);

        let outcome = validate(&config(&[bin.display().to_string()], dir.path()), &ldd);
        assert_eq!(
            status_of(&outcome.report, &format!("file.executable:{}", bin.display())),
            Status::Passed
        );
    }

    #[test]
    fn empty_directive_fails_the_script() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        write_exec(&app, "#!\necho hi\n");

        let outcome = validate(&config(&["app".into()], dir.path()), &Scripted::default());
        let report = &outcome.report;
        let shown = app.display();

        let script = report.find(&format!("script:{shown}")).unwrap();
        assert_eq!(script.status, Status::Failed);
        assert!(script.message.contains("Empty interpreter directive"));
        assert!(report.find(&format!("script.interpreter:{shown}")).is_none());
        assert_eq!(report.exit_code(), 1);
        assert_eq!(outcome.tree.executables["app"].kind, Some(ExecutableKind::Script));
    }

    #[test]
    fn env_without_program_fails_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        let app = dir.path().join("app");
        elf_stub(&env);
        write_exec(&app, &format!("#!{}\n", env.display()));
        let ldd = Scripted::default().reply(&env, false, STATIC);

        let outcome = validate(&config(&["app".into()], dir.path()), &ldd);
        let report = &outcome.report;
        let shown = app.display();

        assert_eq!(status_of(report, &format!("script:{shown}")), Status::Passed);
        assert_eq!(status_of(report, &format!("script.interpreter:{shown}")), Status::Passed);
        let target = report.find(&format!("script.env_target:{shown}")).unwrap();
        assert_eq!(target.status, Status::Failed);
        assert!(target.message.contains("names no program to run"));
        assert_eq!(report.exit_code(), 1);
        assert!(outcome.tree.executables["app"].error.is_some());
    }

    #[test]
    fn relocatable_object_is_noted_in_linkage_message() {
        let dir = tempfile::tempdir().unwrap();
        let obj = dir.path().join("plugin.o");
        elf_stub_of_type(&obj, 1);
        let ldd = Scripted::default().reply(&obj, false, STATIC);

        let outcome = validate(&config(&["plugin.o".into()], dir.path()), &ldd);
        let linkage = outcome
            .report
            .find(&format!("file.linkage:{}", obj.display()))
            .unwrap();

        assert_eq!(linkage.status, Status::Passed);
        assert!(linkage.message.contains("not a program image"), "{}", linkage.message);
    }

    #[test]
    fn program_images_carry_no_note() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("tool");
        elf_stub(&bin);
        let ldd = Scripted::default().reply(&bin, false, STATIC);

        let outcome = validate(&config(&["tool".into()], dir.path()), &ldd);
        let linkage = outcome
            .report
            .find(&format!("file.linkage:{}", bin.display()))
            .unwrap();
        assert!(!linkage.message.contains("not a program image"));
    }

    #[test]
    fn self_referencing_script_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("loop");
        let alias = dir.path().join("alias");
        write_exec(&app, &format!("#!{}\n", alias.display()));
        symlink(&app, &alias).unwrap();

        let outcome = validate(&config(&["loop".into()], dir.path()), &Scripted::default());
        let report = &outcome.report;

        assert_eq!(report.failed, 0);
        let tree = &outcome.tree.executables["loop"];
        let alias_node = &tree.dependencies[0];
        assert_eq!(alias_node.path, alias.display().to_string());
        assert!(alias_node.dependencies[0].cyclic);
    }

    #[test]
    fn same_path_declared_twice_is_checked_once() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("tool");
        elf_stub(&bin);
        let ldd = Scripted::default().reply(&bin, false, STATIC);
        let bins = vec!["tool".to_string(), bin.display().to_string()];

        let outcome = validate(&config(&bins, dir.path()), &ldd);
        let exists = format!("file.exists:{}", bin.display());
        let count = outcome.report.tests.iter().filter(|r| r.name == exists).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn interpreter_shared_by_two_scripts_is_validated_once() {
        let dir = tempfile::tempdir().unwrap();
        let sh = dir.path().join("sh");
        elf_stub(&sh);
        write_exec(&dir.path().join("a"), &format!("#!{}\n", sh.display()));
        write_exec(&dir.path().join("b"), &format!("#!{}\n", sh.display()));
        let ldd = Scripted::default().reply(&sh, false, STATIC);

        let outcome = validate(&config(&["a".into(), "b".into()], dir.path()), &ldd);
        let linkage = format!("file.linkage:{}", sh.display());
        let count = outcome.report.tests.iter().filter(|r| r.name == linkage).count();
        assert_eq!(count, 1);
        assert_eq!(
            outcome.tree.executables["a"].dependencies,
            outcome.tree.executables["b"].dependencies
        );
    }

    #[test]
    fn directory_and_plain_files_are_skipped_or_failed() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.txt");
        let notes = dir.path().join("notes");
        fs::write(&data, "1,2,3\n").unwrap();
        write_exec(&notes, "just text\n");
        let cfg = config(&[], dir.path());
        let ldd = Scripted::default();

        let mut traversal = Traversal::new(&cfg, &ldd);
        traversal.visit(dir.path());
        traversal.visit(&data);
        traversal.visit(&notes);
        traversal.visit(Path::new(""));
        let report = traversal.into_report();

        assert_eq!(
            status_of(&report, &format!("file.directory:{}", dir.path().display())),
            Status::Skipped
        );
        assert_eq!(
            status_of(&report, &format!("file.executable:{}", data.display())),
            Status::Failed
        );
        assert_eq!(
            status_of(&report, &format!("file.type:{}", notes.display())),
            Status::Skipped
        );
        assert_eq!(report.total, report.passed + report.failed + report.skipped);
    }

    #[test]
    fn runs_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("bin");
        fs::create_dir(&bin_dir).unwrap();
        for name in ["c", "a", "b"] {
            write_exec(&bin_dir.join(name), "#!/nonexistent/sh\n");
        }
        let mut cfg = config(&["ghost".into()], dir.path());
        cfg.deploy_dirs = vec![bin_dir];
        let ldd = Scripted::default();

        let first = validate(&cfg, &ldd).report;
        let second = validate(&cfg, &ldd).report;
        assert_eq!(first, second);
        assert_eq!(first.total, first.passed + first.failed + first.skipped);
    }

    #[test]
    fn capture_output_runs_clean_entries() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        write_exec(&app, "#!/bin/sh\necho started\n");
        let ldd = Scripted::default().reply(Path::new("/bin/sh"), false, STATIC);

        let mut cfg = config(&["app".into()], dir.path());
        cfg.capture_output = true;
        let outcome = validate(&cfg, &ldd);

        let exec = outcome.report.find(&format!("exec:{}", app.display())).unwrap();
        assert_eq!(exec.status, Status::Passed);
        let output = outcome.tree.executables["app"].output.as_deref().unwrap();
        assert!(output.contains("started"));
    }
}
