/// 缓存数据模型
/// 定义缓存数据的结构体

// 重置令牌缓存模型
pub mod reset_token;

pub use reset_token::CachedResetToken;
