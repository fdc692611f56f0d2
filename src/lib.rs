pub mod api;
pub mod auth;
pub mod geo;
pub mod media;
pub mod models;
pub mod notify;
pub mod storage;
pub mod store;
pub mod sync;
