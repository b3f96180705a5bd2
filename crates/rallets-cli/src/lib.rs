//! Rallets CLI library
//!
//! Provisioning service client, failover controller and the local tunnel
//! engine behind the `rallets` binary.

pub mod api;
pub mod commands;
pub mod controller;
pub mod tunnel;
