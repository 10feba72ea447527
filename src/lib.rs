//! Core library for the papercast program builder.
//!
//! All article fetching, script generation, speech synthesis, and audio
//! assembly logic lives here. The CLI binary consumes this crate.

pub mod article;
pub mod audio;
pub mod builder;
pub mod config;
pub mod error;
pub mod filter;
pub mod generation;
pub mod program;
pub mod script;
pub mod speech;
pub mod storage;
pub mod store;
