//! Tower Layer implementations for skill transports

pub mod auth;

pub use auth::{AuthCredentials, AuthGate, AuthLayer, AuthService, Authenticator};
