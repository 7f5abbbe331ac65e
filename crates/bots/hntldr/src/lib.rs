pub mod article;
pub mod cancel;
pub mod context;
pub mod error;
pub mod hn;
pub mod notifier;
pub mod poll;
pub mod publisher;
pub mod render;
pub mod synth;
pub mod telegram;
pub mod topic;
pub mod worker;

pub const PROJECT_NAME: &str = "hntldr";
