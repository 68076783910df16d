//! Message bus fabric: client, topic grammar, and the wire envelope

pub mod client;
pub mod envelope;
pub mod topic;

pub use client::{qos_from_u8, BusClient, IncomingMessage};
pub use envelope::{Envelope, MessageType};
pub use topic::TopicFilter;

pub use rumqttc::QoS;
