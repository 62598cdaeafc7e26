pub mod email;
pub mod log;
pub mod webhook;
