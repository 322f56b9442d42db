//! 过期会话的定期清理。
//!
//! 由启动代码创建并持有，`start` 立即清理一次，之后按固定间隔运行，
//! `stop` 通过取消令牌结束后台任务。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::database::SessionStore;

struct RunningJob {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct SessionCleanupService {
    sessions: Arc<dyn SessionStore>,
    job: Mutex<Option<RunningJob>>,
}

impl SessionCleanupService {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions,
            job: Mutex::new(None),
        }
    }

    fn job(&self) -> MutexGuard<'_, Option<RunningJob>> {
        self.job.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 已在运行时不做任何事并返回 `false`
    pub fn start(&self, interval: Duration) -> bool {
        let mut job = self.job();
        if job.as_ref().is_some_and(|j| !j.task.is_finished()) {
            tracing::debug!("Session cleanup already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let sessions = Arc::clone(&self.sessions);
        let task = tokio::spawn(run(sessions, interval, cancel.clone()));
        *job = Some(RunningJob { cancel, task });

        tracing::info!(interval_secs = interval.as_secs(), "Session cleanup started");
        true
    }

    /// 未在运行时返回 `false`
    pub async fn stop(&self) -> bool {
        let Some(job) = self.job().take() else {
            return false;
        };
        job.cancel.cancel();
        if let Err(e) = job.task.await {
            tracing::warn!(error = %e, "Session cleanup task ended abnormally");
        }
        tracing::info!("Session cleanup stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.job().as_ref().is_some_and(|j| !j.task.is_finished())
    }

    /// 立即清理一次，失败只记录日志
    pub async fn cleanup(&self) -> Option<u64> {
        cleanup_once(self.sessions.as_ref()).await
    }
}

async fn cleanup_once(sessions: &dyn SessionStore) -> Option<u64> {
    match sessions.cleanup_expired().await {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!(deleted, "Session cleanup: purged expired or inactive sessions");
            } else {
                tracing::debug!("Session cleanup: nothing to purge");
            }
            Some(deleted)
        }
        Err(e) => {
            tracing::error!(error = %e, "Session cleanup failed");
            None
        }
    }
}

async fn run(sessions: Arc<dyn SessionStore>, period: Duration, cancel: CancellationToken) {
    // 第一次 tick 立即触发
    let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                cleanup_once(sessions.as_ref()).await;
            }
        }
    }
}
