//! Transport-level protocol pieces shared by both sides of a cord.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       RPC Stack                              │
//! │                                                              │
//! │  caller                              remote host             │
//! │  ┌────────┐  ┌───────┐               ┌───────────┐           │
//! │  │ codec  │─▶│ retry │──── HTTP ────▶│ admission │           │
//! │  └────────┘  └───────┘               └─────┬─────┘           │
//! │       ▲                                    ▼                 │
//! │       │                              ┌───────────┐           │
//! │   auth::sign_request                 │   auth    │ session   │
//! │   cipher::seal_frame                 │ cipher /  │ legacy    │
//! │                                      └─────┬─────┘           │
//! │                                            ▼                 │
//! │                                      cord handler ─▶ stream  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod admission;
pub mod auth;
pub mod cipher;
pub mod codec;
pub mod compress;
pub mod legacy;
pub mod retry;
pub mod session;
pub mod stream;
