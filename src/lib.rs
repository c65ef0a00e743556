//! Turns a plain-language app idea into an Android Studio project: a model
//! plans the app, writes its files one by one, and the result is merged into
//! a copy of a fixed project template.

pub mod apply;
pub mod assemble;
pub mod cli;
pub mod config;
pub mod context;
pub mod errors;
pub mod log;
pub mod merge;
pub mod pipeline;
pub mod plan;
pub mod prompt;
pub mod provider;
pub mod safety;
pub mod synth;
pub mod template;
pub mod ux;
pub mod wire;
