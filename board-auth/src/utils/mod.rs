pub mod email;
pub mod password;
pub mod user_agent;
pub mod validation;

pub use email::obfuscate_email;
pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use user_agent::{parse_user_agent, UserAgentInfo};
pub use validation::ValidatedJson;
