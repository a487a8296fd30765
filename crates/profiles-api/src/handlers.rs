//! Request handlers.

pub mod health;
pub mod login;
pub mod password;
pub mod profile;

pub use health::*;
pub use login::*;
pub use password::*;
pub use profile::*;
