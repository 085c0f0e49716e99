//! Optional smoke run of top-level entry points.

use anyhow::{Context, Result};
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Bytes kept from each of stdout and stderr.
pub const MAX_CAPTURE_BYTES: u64 = 64 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum Launched {
    Exited { status: ExitStatus, output: String },
    TimedOut { output: String },
}

/// Runs `path` with no arguments and stdin closed, killing it and anything
/// it started after `timeout`. Spawn failures are errors; a timeout is an
/// outcome.
pub fn launch(path: &Path, timeout: Duration) -> Result<Launched> {
    // Own process group, so a timeout can take down grandchildren too.
    let mut child = Command::new(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .with_context(|| format!("spawning {}", path.display()))?;

    let (tx, rx) = mpsc::channel();
    let mut readers = 0;
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(0, stdout, tx.clone());
        readers += 1;
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(1, stderr, tx.clone());
        readers += 1;
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait().context("polling child")? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            log::debug!("{} still running after {timeout:?}; killing", path.display());
            kill_group(child.id());
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // Descendants may hold the pipes open; collect what arrives promptly.
    let mut streams = [Vec::new(), Vec::new()];
    for _ in 0..readers {
        match rx.recv_timeout(DRAIN_TIMEOUT) {
            Ok((idx, bytes)) => streams[idx] = bytes,
            Err(_) => break,
        }
    }
    let mut output = String::from_utf8_lossy(&streams[0]).into_owned();
    output.push_str(&String::from_utf8_lossy(&streams[1]));

    Ok(match status {
        Some(status) => Launched::Exited { status, output },
        None => Launched::TimedOut { output },
    })
}

/// SIGKILL to every process in the group led by `pgid`.
fn kill_group(pgid: u32) {
    let killed = Command::new("kill")
        .args(["-s", "KILL", "--"])
        .arg(format!("-{pgid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if !matches!(&killed, Ok(status) if status.success()) {
        log::debug!("could not signal process group {pgid}: {killed:?}");
    }
}

fn spawn_reader<R: Read + Send + 'static>(idx: usize, mut pipe: R, tx: mpsc::Sender<(usize, Vec<u8>)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = (&mut pipe).take(MAX_CAPTURE_BYTES).read_to_end(&mut buf);
        // Keep the pipe flowing so a chatty child never blocks on write.
        let _ = io::copy(&mut pipe, &mut io::sink());
        let _ = tx.send((idx, buf));
    });
}
