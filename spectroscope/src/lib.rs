// Library interface for spectroscope modules
// This allows tests and other binaries to import modules

pub mod aggregator;
pub mod balance;
pub mod enrich;
pub mod llm;
pub mod models;
pub mod parser;
pub mod scraping;
pub mod search;
pub mod server;
pub mod storage;
