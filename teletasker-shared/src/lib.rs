#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]

//! Wire models and client configuration shared by the Teletasker crates.

pub mod config;
pub mod models;
