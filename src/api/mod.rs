//! External API: capability tokens and the `/v1` HTTP surface

pub mod acl;
pub mod http;

pub use acl::{is_valid_token, AccessControl};
pub use http::{ApiState, AUTH_HEADER};
