pub mod broker;
pub mod content;
pub mod jobs;
pub mod vault;
