pub mod bus;
pub mod error;
pub mod redis_stream;
pub mod topic;

pub use bus::MessageBus;
pub use error::BusError;
pub use topic::{Subscription, TopicHandle};
