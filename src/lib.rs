//! Library crate for trailhunt-back, exposing modules for the server binary and client tooling.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod sync;

#[cfg(test)]
mod test_support;
