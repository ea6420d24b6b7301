//! Product metrics chart engine: fetches price, sales-rank and rating history
//! for one product, reconciles the series onto a shared timeline and derives
//! the rows each chart section renders.

pub mod config;
pub mod export;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod render;
pub mod source;
pub mod utils;
pub mod view;
