// 业务服务

pub mod auth;
pub mod email;
pub mod session_cleanup;

pub use auth::{
    ActionOutcome, AuthOutcome, AuthService, ClientMeta, IssuedSession, LoginInput,
    ProfileUpdateInput, ProfileView, RegisterInput, SessionView,
};
pub use email::{EmailNotifier, HttpEmailNotifier, LogEmailNotifier, notifier_from_config};
pub use session_cleanup::SessionCleanupService;
