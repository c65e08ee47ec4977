// Notifications push: real-time content change notifications.
//
// This is the library root. Queue messages flow through `consumer` into
// the `dispatch` broker, which fans them out to streaming subscribers
// served by `web`. `service` ties the broker and the queue consumer
// together for the lifetime of the process.

pub mod cache;
pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod health;
pub mod queue;
pub mod service;
pub mod signals;
pub mod supervisor;
pub mod web;
