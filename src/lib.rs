pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod prices;
pub mod reconcile;
pub mod server;
pub mod upstream;
pub mod verify;
