pub mod client;
pub mod websocket;

pub use client::KrakenClient;
pub use websocket::{KrakenPrivateStream, PrivateStreamEvent};
