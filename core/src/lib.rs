pub mod cache;
pub mod composer;
pub mod db;
pub mod error;
pub mod history;
pub mod materializer;
pub mod models;
pub mod reader;
pub mod reconciler;
pub mod regeneration;
pub mod retry;
pub mod service;
pub mod shopping;
pub mod week;
