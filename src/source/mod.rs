//! External collaborators of the dispatcher
//!
//! The dispatcher pulls templates from a [`TemplateSource`] and pushes
//! solved headers into a [`SolutionSink`]. Network fetching and submission
//! live outside this crate; the implementations here are in-process or
//! file based.

/// Template sources and the JSON template file format
pub mod template;

/// Solution sinks
pub mod sink;

pub use sink::{ChannelSink, ShareLog, Solution, SolutionSink};
pub use template::{SharedTemplateSource, StaticTemplateSource, TemplateFile, TemplateSource};
