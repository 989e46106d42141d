//! Gemini gateway to the web
//!
//! Serves the Gemini protocol on the front and fetches content over
//! HTTP(S) on the back, rewriting HTML documents, syndication feeds, and
//! images into forms a Gemini client can use.

pub mod charset;
pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod requestors;
pub mod response;
pub mod server;
pub mod source;
pub mod tls;
pub mod transformers;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use server::GatewayServer;
