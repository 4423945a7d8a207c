#![allow(async_fn_in_trait)]
pub mod builder;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod lock;
pub mod manifest;
pub mod odata;
pub mod pipeline;
pub mod product;
pub mod stac_item;
pub mod translate;
