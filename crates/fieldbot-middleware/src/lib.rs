//! `fieldbot-middleware` – Command & Telemetry Channel
//!
//! The robot's only external surface: one operator connection at a time
//! carrying JSON commands in and plain-text telemetry tokens out.
//!
//! # Modules
//!
//! - [`frame`] – [`JsonFrameDecoder`][frame::JsonFrameDecoder]: splits a
//!   byte stream into JSON values without relying on delimiters.
//! - [`protocol`] – classifies inbound values as patterns or manual
//!   commands and renders the `BATTERY:` / `PROGRESS:` tokens.
//! - [`command_channel`] – [`CommandChannel`][command_channel::CommandChannel]:
//!   the accept loop, the per-connection receive loop and the periodic
//!   telemetry task.

pub mod command_channel;
pub mod frame;
pub mod protocol;

pub use command_channel::{ChannelConfig, CommandChannel};
pub use frame::JsonFrameDecoder;
pub use protocol::{Inbound, classify};
