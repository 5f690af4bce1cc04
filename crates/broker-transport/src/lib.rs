#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Transport and dispatch-loop layer for the broker: router-style sockets,
//! the synthetic timer tick, and the in-process async hub, wired together by
//! a single-threaded [`reactor::Reactor`].

pub mod hub;
pub mod message;
pub mod reactor;
pub mod socket;

pub use hub::{Hub, HubEndpoint, TERMINATE};
pub use message::{Frame, Message};
pub use reactor::{Handler, Reactor, KEY_TIMER};
pub use socket::RouterSocketWrapper;
