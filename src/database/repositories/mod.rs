// Postgres 存储库实现

pub mod session;
pub mod user;

pub use session::SessionRepository;
pub use user::UserRepository;
