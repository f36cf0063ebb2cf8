//! GoStint client
//!
//! This library provides the core of `gostint-client`, which submits jobs to a
//! GoStint job service without ever handing it a usable secret directly. The
//! job travels transit-encrypted inside a Vault cubbyhole, alongside a wrapped
//! AppRole secret-id the service unwraps to run it.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod models;
pub mod services;
