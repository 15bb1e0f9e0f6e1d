pub mod cache;
pub mod condition;
pub mod domain;
pub mod engine;
