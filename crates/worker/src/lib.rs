pub mod consumer;
pub mod health;
pub mod queue;
pub mod trigger;
