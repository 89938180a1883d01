//! Built-in, self-contained tools.

pub mod browser;
pub mod fs;
pub mod memory;
pub mod shell;
pub mod web_fetch;

pub use browser::BrowserTool;
pub use fs::{FsListTool, FsReadTool, FsWriteTool};
pub use memory::{MemorySearchTool, MemoryStoreTool};
pub use shell::{ProcessTool, ShellTool};
pub use web_fetch::WebFetchTool;
