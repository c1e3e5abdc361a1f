pub mod chat;
pub mod config;
pub mod host;
pub mod logger;
pub mod message;
pub mod platform;
pub mod plugins;
pub mod sandbox;
pub mod workflow;
