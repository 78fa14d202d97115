pub mod api;
pub mod auth;
pub mod classify;
pub mod client;
pub mod config;
pub mod conversation;
pub mod debts;
pub mod error;
pub mod gateway;
pub mod models;
pub mod presentation;
pub mod protocol;
pub mod storage;
pub mod sync;
pub mod tasks;
