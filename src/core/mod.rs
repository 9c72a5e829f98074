pub mod client;
pub mod config;
pub mod credential;
pub mod dag;
pub mod progress;
pub mod terminal;
pub mod tools;
