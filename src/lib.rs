#![recursion_limit = "256"]

pub mod activation;
pub mod config;
pub mod drop_connect;
pub mod error;
pub mod inference;
pub mod layers;
pub mod models;
pub mod torch_ops;
pub mod transforms;
pub mod weights;
