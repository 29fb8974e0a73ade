pub mod authentication;
pub mod credentials;
pub mod login;
pub mod password;
pub mod permissions;
pub mod token;
pub mod user;

pub use authentication::*;
pub use credentials::*;
pub use login::*;
pub use password::*;
pub use permissions::*;
pub use token::*;
pub use user::*;
