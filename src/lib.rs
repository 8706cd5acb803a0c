#![allow(async_fn_in_trait)]

pub mod chrome;
pub mod config;
pub(crate) mod dirs;
pub mod dom;
pub mod error;
pub mod extractors;
pub mod fetch;
pub mod media;
pub mod resolve;
pub mod sites;
