//! Application module
//!
//! Wiring of the daemon: building the pipeline, running its tasks and the
//! start/stop switch behind the activation API.

pub mod builder;
pub mod collection;
pub mod core;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use collection::CollectionControl;
pub use collection::StartOutcome;
pub use collection::StopOutcome;
pub use self::core::Application;
