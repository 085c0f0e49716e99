pub mod config;
pub mod discovery;
pub mod entry;
pub mod header;
pub mod launch;
pub mod linkage;
pub mod record;
pub mod script;
pub mod summary;
pub mod traversal;

pub use config::*;
pub use entry::*;
pub use linkage::{DependencyInspector, Ldd};
pub use record::*;
pub use summary::summarise;
pub use traversal::{validate, Outcome};
