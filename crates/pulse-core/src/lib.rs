//! # pulse-core
//!
//! Foundation types shared across the pulse gateway: the wire [`Event`]
//! unit and the branded [`SessionId`].

#![deny(unsafe_code)]

pub mod event;
pub mod ids;

pub use event::Event;
pub use ids::SessionId;
