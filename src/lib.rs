#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod error;
pub mod types;
pub mod ws;

pub use client::{Client, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT};
pub use types::Classification;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
