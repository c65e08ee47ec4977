pub mod health;
pub mod history;
pub mod notifications;
pub mod push;
pub mod stats;
