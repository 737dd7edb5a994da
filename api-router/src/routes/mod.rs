pub mod chat;
pub mod email;
pub mod insights;
pub mod liveness;
pub mod memory;
pub mod metadata;
pub mod readiness;
pub mod sessions;
