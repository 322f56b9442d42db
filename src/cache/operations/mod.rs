/// 缓存操作
/// 提供缓存操作的功能实现

pub mod reset_token;

pub use reset_token::ResetTokenCacheOperations;
