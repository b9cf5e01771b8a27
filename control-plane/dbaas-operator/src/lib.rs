pub mod config;
pub mod controller;
pub mod crd;
pub mod runtime;
pub mod store;
pub mod sync;
pub mod web;

use tracing_subscriber::{
    EnvFilter, filter::LevelFilter, layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Version stamped into the `dbaas.io/resource-version` compatibility check.
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn init_tracing(default_env: &str) {
    let filter = EnvFilter::builder()
        .with_env_var("RUST_LOG")
        .from_env_lossy()
        .add_directive(
            default_env
                .parse()
                .unwrap_or_else(|_| LevelFilter::INFO.into()),
        );

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}
