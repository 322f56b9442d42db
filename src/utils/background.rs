//! 非致命副作用与存储调用超时的统一处理。
//!
//! 最后登录时间、会话活跃时间、重置邮件发送等操作失败时只记录警告，
//! 绝不向调用方传播。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;

/// 等待一个非致命操作完成，失败时记录警告并吞掉错误
pub async fn best_effort<F, T, E>(operation: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(operation, error = %e, "Non-fatal side effect failed");
            None
        }
    }
}

/// 后台执行一个非致命操作，不等待结果
pub fn spawn_best_effort<F, T, E>(operation: &'static str, fut: F)
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        best_effort(operation, fut).await;
    });
}

/// 为存储调用加上超时，超时返回 [`StoreError::Timeout`]
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}
