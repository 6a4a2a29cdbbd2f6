pub mod access;
pub mod auth;
pub mod error;
pub mod events;
pub mod routing;
pub mod storage;
pub mod workflow;
