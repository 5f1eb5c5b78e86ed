//! # SharewareZ Backend Library
//!
//! Core of SharewareZ, a self-hosted game library server. It catalogues game
//! folders (or single game files) found in library directories, enriches them
//! with IGDB metadata, keeps the catalogue current through folder watching and
//! scan jobs, and packages games as ZIP downloads.
//!
//! ## Core Components
//!
//! - [`config`]: layered configuration (embedded defaults, TOML file, env)
//! - [`db`]: schema initialization, seed data and shared queries
//! - [`error`]: centralized error handling and HTTP error responses
//! - [`naming`]: release-name cleaning heuristic
//! - [`scanner`]: discovery and cataloguing of games, scan job lifecycle
//! - [`igdb`]: metadata source seam and the IGDB client
//! - [`packaging`]: download planning and ZIP packaging
//! - [`watcher`]: library folder monitoring
//! - [`images`]: background cover/screenshot downloader
//! - [`admin`]: operator tooling (admin creation, path reconciliation)
//! - [`metrics`], [`middleware`], [`routes`], [`state`], [`types`]: the HTTP service

pub mod admin;
pub mod config;
pub mod db;
pub mod error;
pub mod igdb;
pub mod images;
pub mod metrics;
pub mod middleware;
pub mod naming;
pub mod packaging;
pub mod routes;
pub mod scanner;
pub mod state;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod tests;
