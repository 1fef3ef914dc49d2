//! Domain services for sessions, two-factor authentication and password
//! recovery, plus the persistence and mail collaborators they depend on.

mod auth;
pub mod cookie;
mod database;
pub mod email;
pub mod error;
pub mod memory;
pub mod mfa;
mod password_reset;
pub mod session;
pub mod store;

pub use auth::AuthService;
pub use cookie::{CookieCodec, CookieError};
pub use database::MongoDb;
pub use email::{EmailProvider, EmailService, MockEmailService};
pub use error::ServiceError;
pub use memory::{MemoryPasswordResetStore, MemorySessionStore, MemoryUserStore};
pub use mfa::{ChallengeOutcome, Enrollment, MfaService, MfaSettings};
pub use password_reset::PasswordResetService;
pub use session::{SessionService, SessionSettings};
pub use store::{PasswordResetStore, ReplaceOutcome, SessionStore, UserStore};
