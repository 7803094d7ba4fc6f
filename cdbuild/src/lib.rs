pub mod args;
pub mod cloudbuild;
pub mod compressor;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod orphans;
pub mod pipeline;
pub mod poll;
pub mod rt;
pub mod run;
pub mod storage;
