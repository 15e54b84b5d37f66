//! Persistence layer for cairn: the roadmap aggregate model, connection
//! pool management, embedded migrations and query functions.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
