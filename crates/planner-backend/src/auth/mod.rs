//! Session authentication: Google sign-in, JWT cookies, and the
//! `require_auth` layer that scopes every API call to one planner user.

mod handlers;
mod jwt;
mod middleware;
pub mod types;

pub use handlers::{auth_callback, auth_login, auth_logout, auth_me};
pub use jwt::create_token;
pub use middleware::{build_auth_cookie, extract_auth_user, require_auth};
pub use types::{AuthConfig, AuthUser};
