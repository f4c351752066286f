pub mod discovered_channels;
pub mod health;
pub mod queue;
pub mod stats;
pub mod telegram_auth;
