//! Background workers

pub mod poller;

pub use poller::IntentPoller;
