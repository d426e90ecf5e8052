pub mod config;
pub mod error;
pub mod messages;
pub mod model;
pub mod time;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::messages::*;
    pub use crate::model::*;
    pub use crate::time::*;
}
