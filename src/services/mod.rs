pub mod aggregator;
pub mod catalog;
pub mod engine;
pub mod fetcher;
pub mod m3u_parser;
pub mod ordering;
pub mod override_store;
pub mod overrides;
pub mod redis;
pub mod relay;
pub mod rewriter;
pub mod timeout_writer;
