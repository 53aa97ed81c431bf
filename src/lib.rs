//! Mail Assist: summarize today's unread mail and draft replies for review.

pub mod config;
pub mod decoder;
pub mod error;
pub mod llm;
pub mod mail;
pub mod pipeline;
pub mod session;
pub mod web;
pub mod worker;
