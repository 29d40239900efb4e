pub mod backend;
pub mod basins;
pub mod config;
pub mod error;
pub mod geometry;
pub mod jobs;
pub mod parser;
pub mod pipeline;
pub mod region;
pub mod request;
pub mod timeseries;
