//! WaveLink wireless adapter driver.
//!
//! A hardware-agnostic driver for the WaveLink short-range wireless
//! adapter, spoken to over a 32-bit serial bus. Up to five peers (one
//! host + four clients) exchange application messages with optional
//! reliable delivery and host-mediated forwarding. A second, one-shot
//! core ([`multiboot`]) uploads an executable image to a peer device
//! over the same 32-bit serial primitive.
//!
//! All hardware access flows through the port traits in
//! [`driver::ports`]; platform integrations implement them and wire
//! the three interrupt entry points (`on_vblank`, `on_serial`,
//! `on_timer`) to their IRQ sources, optionally via [`isr`].

#![deny(unused_must_use)]

pub mod config;
pub mod driver;
pub mod error;
pub mod isr;
pub mod multiboot;
pub mod proto;

pub use config::LinkConfig;
pub use driver::ports::{AdapterPort, AsyncState, BusMode};
pub use driver::session::Message;
pub use driver::{LinkDriver, LinkState};
pub use error::LinkError;
pub use proto::broadcast::ServerInfo;

/// Driver identification string, reported by diagnostics tooling.
pub const DRIVER_VERSION: &str = "wavelink/v0.3.0";
