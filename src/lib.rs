pub mod adapters;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod ports;
pub mod services;

pub use error::{LedgerError, LedgerResult};
