use std::error::Error;

pub mod api;
pub mod bus;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod items;
pub mod model;
pub mod observer;
pub mod popup;
pub mod rate_limit;
pub mod router;
pub mod source;
pub mod summarize;
pub mod validation;

pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
