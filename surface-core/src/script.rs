use std::path::Path;

/// The launcher that takes the real program as its first plain argument.
pub const LAUNCHER: &str = "env";

/// A parsed interpreter directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shebang {
    pub interpreter: String,
    /// Everything after the interpreter token, trimmed.
    pub args: String,
}

impl Shebang {
    /// Parses a `#!` line. Returns `None` when no interpreter is named.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("#!")?;
        let rest = rest.trim_start();
        let (interpreter, args) = match rest.find(char::is_whitespace) {
            Some(idx) => (&rest[..idx], rest[idx..].trim()),
            None => (rest.trim_end(), ""),
        };
        if interpreter.is_empty() {
            return None;
        }
        Some(Self {
            interpreter: interpreter.to_string(),
            args: args.to_string(),
        })
    }

    pub fn describe(&self) -> String {
        if self.args.is_empty() {
            format!("Shebang interpreter {}", self.interpreter)
        } else {
            format!(
                "Shebang interpreter {} with arguments: {}",
                self.interpreter, self.args
            )
        }
    }

    /// The program a launcher directive dispatches to: the first argument
    /// that is neither a flag nor a `NAME=value` assignment.
    pub fn launcher_target(&self) -> Option<&str> {
        self.args
            .split_whitespace()
            .find(|token| !token.starts_with('-') && !token.contains('='))
    }
}

pub fn is_launcher(interpreter: &Path) -> bool {
    interpreter
        .file_name()
        .is_some_and(|name| name == LAUNCHER)
}
