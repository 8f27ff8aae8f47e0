#![allow(dead_code)]

pub mod comic_paths;
pub mod config;
pub mod context;
pub mod errors;
pub mod logging;
pub mod session;
