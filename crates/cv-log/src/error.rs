use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Consumer group '{group}' does not exist on topic '{topic}'")]
    NoSuchGroup { topic: String, group: String },

    #[error("Log is stopped")]
    Stopped,

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
