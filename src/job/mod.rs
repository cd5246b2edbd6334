pub mod engine;
pub mod error;
pub mod observer;
pub mod progress;
pub mod spec;
pub mod state;
