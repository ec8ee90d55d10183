pub mod loader;

pub use loader::{bind_config, parse_raw};
