pub mod amqp;
pub mod channel;
pub mod classifier;
pub mod connection;
pub mod consumer;
pub mod handler;
pub mod memory;
pub mod publisher;
pub mod setup;
pub mod subscription;
pub mod topology;

pub use amqp::{AmqpDelivery, AmqpSubscription};
pub use channel::{ChannelError, ChannelProvider};
pub use classifier::{classify, DeliveryClassifier, PatternClassifier, Verdict};
pub use connection::{ConnectionError, RabbitMqConnection};
pub use consumer::{Consumer, ConsumerStats};
pub use handler::{handler_fn, EventHandler, HandlerError};
pub use memory::{InMemoryQueue, InMemorySubscription, Settlement};
pub use publisher::{send, PublishError};
pub use setup::{subscribe, Session, SetupError};
pub use subscription::{AckMode, Delivery, Disposition, Subscription};
pub use topology::{Topology, TopologyError};
