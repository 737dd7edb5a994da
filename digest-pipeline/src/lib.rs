#![allow(clippy::missing_docs_in_private_items)]

pub mod brevo;
pub mod builder;
pub mod dispatch;
pub mod webhook;

pub use builder::{build_payload, DigestPayload};
pub use dispatch::{should_send, week_start, DigestDecision, DigestDispatcher};
