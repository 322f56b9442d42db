/// 缓存键模块
/// 提供各种缓存键生成函数

// 重置令牌缓存键模块
pub mod reset_token_keys;

pub use reset_token_keys::reset_token_key;
