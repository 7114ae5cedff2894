// src/services/mod.rs
pub mod chat_service;

pub use chat_service::ChatService;
