pub mod auth;
pub mod images;
pub mod publish;

pub use auth::{AuthError, AuthService, Identity, SessionEvent, SessionGrant};
pub use images::ImagePolicy;
pub use publish::{PublishRequest, PublishRules};
