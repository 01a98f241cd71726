pub mod algorithms;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod health;
pub mod middleware;
pub mod proxy;
pub mod rate_limiter;
pub mod redis;
pub mod registry;
pub mod routing;
pub mod server;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use server::{create_app, Gateway, Server};
