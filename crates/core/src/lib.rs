pub mod config;
pub mod cycle;
pub mod digest;
pub mod domain;
pub mod error;
pub mod llm;
pub mod news;
pub mod notify;
pub mod retry;
pub mod sentiment;
pub mod state;
pub mod storage;

#[cfg(test)]
mod testkit;
