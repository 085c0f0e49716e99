use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
        };
        write!(f, "{}", name)
    }
}

/// A single named check. The name is `<kind>:<subject>`, e.g.
/// `file.exists:/usr/bin/ls` or `ldd:/usr/bin/ls:libc.so.6`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub name: String,
    pub status: Status,
    pub message: String,
}

impl CheckRecord {
    pub fn new(name: impl Into<String>, status: Status, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
        }
    }
}

/// Ordered accumulation of check records for one run.
#[derive(Debug, Default)]
pub struct Aggregator {
    records: Vec<CheckRecord>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: CheckRecord) {
        log::debug!("{} [{}] {}", record.name, record.status, record.message);
        self.records.push(record);
    }

    pub fn pass(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.push(CheckRecord::new(name, Status::Passed, message));
    }

    pub fn fail(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.push(CheckRecord::new(name, Status::Failed, message));
    }

    pub fn skip(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.push(CheckRecord::new(name, Status::Skipped, message));
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = CheckRecord>) {
        for record in records {
            self.push(record);
        }
    }

    pub fn finish(self) -> Report {
        Report::from_records(self.records)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub tests: Vec<CheckRecord>,
}

impl Report {
    pub fn from_records(tests: Vec<CheckRecord>) -> Self {
        let count = |status: Status| tests.iter().filter(|r| r.status == status).count();
        let passed = count(Status::Passed);
        let failed = count(Status::Failed);
        let skipped = count(Status::Skipped);
        Self {
            total: tests.len(),
            passed,
            failed,
            skipped,
            tests,
        }
    }

    /// The aggregate verdict: failed iff any single check failed.
    pub fn status(&self) -> Status {
        if self.failed > 0 {
            Status::Failed
        } else {
            Status::Passed
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status() {
            Status::Failed => 1,
            _ => 0,
        }
    }

    pub fn find(&self, name: &str) -> Option<&CheckRecord> {
        self.tests.iter().find(|r| r.name == name)
    }
}
