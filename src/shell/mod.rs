pub mod builtins;
pub mod executor;
pub mod jobs;
pub mod parser;
pub mod registry;
pub mod repl;
pub mod session;
pub mod signal;
pub mod terminal;

pub use executor::Executor;
pub use registry::Registry;
pub use session::Session;
