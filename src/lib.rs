/// minikit - pluggable application servers and small crypto helpers.
///
/// - `server`: backend registry, the application contract and the serving
///   backends
/// - `crypto`: authenticated AES cipher, digests and secret keys
/// - `config`: server configuration and layered overrides
/// - `utils`: soft-fail file helpers
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod server;
pub mod utils;

pub use config::{AppType, BindAddr, ConfigOverrides, ServerConfig};
pub use error::{KitError, Result};
pub use server::{make_server, Application, Server};
