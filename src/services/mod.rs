// Services module - Business logic

pub mod contact_tracing;
pub mod encryption;
pub mod engine;
pub mod keyholder_payload;
pub mod mailer;
pub mod member_import;
pub mod password_reset;
pub mod reports;
pub mod statistics;
pub mod updates;
pub mod usage_graph;
