mod client;

pub use client::AlpacaClient;
