pub mod cli;
pub mod daemon;
pub mod pipeline;

pub use cli::*;
pub use daemon::*;
pub use pipeline::*;
