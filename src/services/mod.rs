pub mod access;
pub mod auth;
pub mod encryption;
pub mod lockout;
pub mod metrics;
pub mod password;
pub mod refresh;
pub mod roles;
pub mod sweeper;
pub mod token;
