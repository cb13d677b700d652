//! Data types shared by the planner, fetcher and crawler.

pub mod config;
pub mod coordinate;
pub mod crawl;
pub mod job;
pub mod locator;
pub mod manifest;
pub mod matches;
pub mod summary;
