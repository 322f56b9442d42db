#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use brickvault::{
    cache::{MemoryResetTokenCache, ResetTokenCache},
    config::AuthSettings,
    database::{MemoryDatabase, SessionPolicy, SessionStore, UserStore},
    services::{
        AuthOutcome, AuthService, ClientMeta, EmailNotifier, RegisterInput,
        email::NotifierError,
    },
    utils::ManualClock,
};

pub const PASSWORD: &str = "Brick4Life";

/// 记录所有发出的重置邮件
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// 等待后台任务把邮件交给通知器
    pub async fn wait_for_token(&self, to: &str) -> String {
        for _ in 0..200 {
            if let Some((_, token)) = self.sent().into_iter().rev().find(|(addr, _)| addr == to) {
                return token;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no reset email sent to {to}");
    }
}

#[async_trait]
impl EmailNotifier for RecordingNotifier {
    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), NotifierError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), token.to_string()));
        Ok(())
    }
}

pub fn settings() -> AuthSettings {
    AuthSettings {
        jwt_secret: "integration-test-secret".into(),
        bcrypt_cost: 4,
        ..AuthSettings::default()
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub db: Arc<MemoryDatabase>,
    pub cache: Arc<MemoryResetTokenCache>,
    pub notifier: Arc<RecordingNotifier>,
    pub auth: Arc<AuthService>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let db = Arc::new(MemoryDatabase::new(clock.clone(), SessionPolicy::default()));
        Self::build(clock, db.clone(), db.clone(), db)
    }

    /// `users`/`sessions` 可以是包装了 `db` 的存储
    pub fn build(
        clock: Arc<ManualClock>,
        db: Arc<MemoryDatabase>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let cache = Arc::new(MemoryResetTokenCache::new(clock.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let auth = AuthService::new(
            users,
            sessions,
            cache.clone() as Arc<dyn ResetTokenCache>,
            notifier.clone(),
            clock.clone(),
            settings(),
        )
        .unwrap();
        Self {
            clock,
            db,
            cache,
            notifier,
            auth: Arc::new(auth),
        }
    }

    pub async fn register(&self, email: &str) -> AuthOutcome {
        self.auth
            .register(
                RegisterInput {
                    email: email.into(),
                    password: PASSWORD.into(),
                    username: Some("brickfan".into()),
                    ..Default::default()
                },
                ClientMeta::default(),
            )
            .await
            .unwrap()
    }
}

pub fn device(name: &str) -> ClientMeta {
    ClientMeta {
        user_agent: Some(format!("{name}/1.0")),
        ip_address: Some("192.0.2.10".into()),
        device_fingerprint: Some(name.into()),
    }
}
