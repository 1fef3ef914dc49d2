pub mod password_reset;
pub mod session;
pub mod user;

pub use password_reset::PasswordReset;
pub use session::{NewSession, Session};
pub use user::{SanitizedUser, User, DEFAULT_AUTH_DURATION_SECONDS};
