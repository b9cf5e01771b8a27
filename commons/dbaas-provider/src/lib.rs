pub mod api;
pub mod error;
pub mod factory;
pub mod http;
pub mod models;

#[cfg(feature = "memory")]
pub mod memory;

pub use api::*;
pub use error::*;
pub use factory::{HttpProviderFactory, ProviderFactory};
pub use http::HttpProviderClient;
pub use models::*;
