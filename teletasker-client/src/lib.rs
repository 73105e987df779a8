#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]

//! Client-side synchronization for the Teletasker dashboard.
//!
//! A [`controller::Dashboard`] owns the selected chat and reconciles three
//! writers of the shared task collection: the initial load, the
//! [`poller::StatusPoller`] and the [`stream::UpdateStream`]. Every write goes
//! through [`fetcher::TaskFetcher`], which replaces tasks per chat id.

pub mod api;
pub mod auth;
pub mod cache;
pub mod collection;
pub mod controller;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod poller;
pub mod sse;
pub mod stream;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{SyncError, SyncResult};
