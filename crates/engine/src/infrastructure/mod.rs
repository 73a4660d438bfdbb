pub mod clock;
pub mod cooldown;
pub mod ollama;
pub mod ports;
pub mod store;
