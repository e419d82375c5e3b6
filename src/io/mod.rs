pub mod filesystem;
pub mod loader;
pub mod permission;
pub mod report;

pub use filesystem::{Entry, EntryKind, FileSystem};
pub use permission::{Access, Identity, Mode, Protected};
