// API 处理器

pub mod auth;
pub mod user;
