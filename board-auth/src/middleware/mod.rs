pub mod auth;

pub use auth::{
    require_mfa_middleware, session_auth_middleware, AuthContext, AuthSession, AuthUser,
};
