// 数据库实体定义

pub mod session;
pub mod user;

pub use session::{
    CreatedSession, NewSession, SessionEntity, SessionPolicy, SessionState, SessionWithUser,
};
pub use user::{NewUser, ProfileFields, UserEntity, normalize_email};
