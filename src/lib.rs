pub mod annotate;
pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod gnps;
pub mod merge;
pub mod mgf;
pub mod output;
pub mod pipeline;
pub mod renumber;
pub mod store;
pub mod table;
