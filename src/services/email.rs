//! 出站邮件通知。
//!
//! 配置了 `MAIL_API_URL` 时通过 HTTP 邮件服务发送，否则只写日志。

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::Config;
use crate::utils::token_preview;

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("mail api request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[async_trait]
pub trait EmailNotifier: Send + Sync {
    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), NotifierError>;
}

pub fn reset_link(frontend_url: &str, token: &str) -> String {
    format!(
        "{}/reset-password?token={}",
        frontend_url.trim_end_matches('/'),
        token
    )
}

#[derive(Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
}

/// 通过 HTTP 邮件服务发送
pub struct HttpEmailNotifier {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
    frontend_url: String,
}

impl HttpEmailNotifier {
    pub fn new(
        api_url: String,
        api_key: Option<String>,
        from: String,
        frontend_url: String,
    ) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_url,
            api_key,
            from,
            frontend_url,
        })
    }
}

#[async_trait]
impl EmailNotifier for HttpEmailNotifier {
    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), NotifierError> {
        let body = MailRequest {
            from: &self.from,
            to,
            subject: "重置你的 BrickVault 密码",
            text: format!(
                "我们收到了重置密码的请求。请在 1 小时内打开以下链接设置新密码：\n\n{}\n\n如果这不是你本人的操作，请忽略此邮件。",
                reset_link(&self.frontend_url, token)
            ),
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request.send().await?.error_for_status()?;

        tracing::info!(token = %token_preview(token), "Sent password reset email");
        Ok(())
    }
}

/// 只记录日志，不真正发送
#[derive(Debug, Default)]
pub struct LogEmailNotifier;

#[async_trait]
impl EmailNotifier for LogEmailNotifier {
    async fn send_password_reset(&self, _to: &str, token: &str) -> Result<(), NotifierError> {
        tracing::info!(
            token = %token_preview(token),
            "Password reset email not sent: no mail api configured"
        );
        Ok(())
    }
}

/// 根据配置选择实现
pub fn notifier_from_config(
    config: &Config,
) -> Result<std::sync::Arc<dyn EmailNotifier>, NotifierError> {
    match &config.mail_api_url {
        Some(url) => Ok(std::sync::Arc::new(HttpEmailNotifier::new(
            url.clone(),
            config.mail_api_key.clone(),
            config.mail_from.clone(),
            config.frontend_url.clone(),
        )?)),
        None => Ok(std::sync::Arc::new(LogEmailNotifier)),
    }
}
