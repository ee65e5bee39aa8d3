//! ARENA — LLM agents at the blackjack table, with a wager market on top
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod audit;
pub mod config;
pub mod types;
pub mod game;
pub mod protocol;
pub mod llm;
pub mod engine;
pub mod market;
pub mod storage;
pub mod server;
