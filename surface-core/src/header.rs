pub mod elf;

use crate::header::elf::{ElfSummary, ELF_MAGIC};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Upper bound on bytes read from the front of a candidate file.
pub const MAX_HEADER_BYTES: u64 = 4096;

pub const SHEBANG: &[u8] = b"#!";

pub trait Header: fmt::Debug + Send + Sync {
    /// Returns true if this is a 64-bit binary.
    fn is_64(&self) -> bool;

    /// Returns a short human-readable name, e.g. "ELF".
    fn format_name(&self) -> &'static str;

    /// Returns true if the image is a loadable program (vs object/core).
    fn is_executable(&self) -> bool;

    /// One-line description used in report messages.
    fn describe(&self) -> String;
}

/// What the leading bytes of a file say it is.
#[derive(Debug)]
pub enum FileClass {
    /// Native executable image; the decoded header when the block held one.
    Elf(Option<ElfSummary>),
    /// Interpreted script; carries the directive line including `#!`.
    Script(String),
    Unknown,
}

/// Reads at most [`MAX_HEADER_BYTES`] from the start of `path`.
pub fn read_block<P: AsRef<Path>>(path: P) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = Vec::new();
    file.take(MAX_HEADER_BYTES).read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn classify(block: &[u8]) -> FileClass {
    if block.starts_with(&ELF_MAGIC) {
        let summary = match ElfSummary::parse(block) {
            Ok(summary) => Some(summary),
            Err(e) => {
                log::debug!("ELF magic present but header undecodable: {e}");
                None
            }
        };
        return FileClass::Elf(summary);
    }

    if block.starts_with(SHEBANG) {
        return FileClass::Script(first_line(block));
    }

    FileClass::Unknown
}

fn first_line(block: &[u8]) -> String {
    let end = block
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(block.len());
    String::from_utf8_lossy(&block[..end])
        .trim_end_matches('\r')
        .to_string()
}
