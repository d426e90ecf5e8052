pub mod pool;
pub mod streams;
pub mod symbols;

pub use pool::{connect, priority_connect, MIGRATOR};
pub use symbols::PgSymbolRegistry;
