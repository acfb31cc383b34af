pub mod actor;
pub mod client;
pub mod config;
pub mod connection;
pub mod dependency_tree;
pub mod error;
pub mod frame;
pub mod frequency_counter;
pub mod hpack;
pub mod request;
pub mod response;
pub mod socket;
pub mod stream;
pub mod timers;
pub mod transaction;
pub mod wake;
pub mod window;
