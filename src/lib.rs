//! chat-nest — passive capture of chat transcripts into a local archive.

pub mod background;
pub mod capture;
pub mod config;
pub mod error;
pub mod extract;
pub mod identity;
pub mod model;
pub mod observer;
pub mod protocol;
pub mod recovery;
pub mod store;
pub mod transcript;
