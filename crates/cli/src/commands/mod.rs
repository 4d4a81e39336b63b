//! CLI Commands

pub mod config;
pub mod dispatch;
pub mod engines;
pub mod event;
pub mod record;
pub mod status_codes;
