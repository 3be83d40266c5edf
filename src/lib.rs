pub mod app;
pub mod bids;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod select;
pub mod xnat;
