//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{FakeMatcher, TestClient, TestServer, ADX_NAME, CLIP_NAME};
//! use reqwest::StatusCode;
//!
//! #[tokio::test]
//! async fn test_match() {
//!     let server = TestServer::spawn(FakeMatcher::Matching).await;
//!     let client = TestClient::new(server.base_url.clone());
//!
//!     client.upload_test_files().await;
//!     let response = client.match_audio(CLIP_NAME, ADX_NAME).await;
//!     assert_eq!(response.status(), StatusCode::OK);
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
pub use fixtures::{FakeFfmpeg, FakeMatcher};
pub use server::{TestServer, TestServerOptions};
