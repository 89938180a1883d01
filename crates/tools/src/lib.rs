//! Tool contract, registry, and the self-contained built-in tools.
//!
//! Tools are stateless from the loop's perspective: persistent state lives
//! in each tool's own subsystem (process manager, browser controller,
//! memory backend). Cross-cutting tools that need the session registry are
//! defined in the gateway and registered into the same [`ToolRegistry`].

pub mod builtin;
pub mod process;
pub mod registry;
pub mod tool;

pub use process::ProcessManager;
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext};
