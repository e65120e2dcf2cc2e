pub mod cli;
pub mod config;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod storage;
