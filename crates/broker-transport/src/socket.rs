//! Router-style socket wrapper: the concrete transport the reactor polls.
//!
//! A ROUTER socket prepends the sender's routing identity as the first frame
//! on receive, and requires it as the first frame on send. That is the
//! "ordered byte frames with a leading peer-identity frame" shape the rest of
//! this crate builds on.

use anyhow::{Context, Result};
use bytes::Bytes;
use zeromq::{Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::message::Message;

/// A bound or connected ROUTER socket, tagged with the reactor key it serves.
pub struct RouterSocketWrapper {
    key: String,
    socket: zeromq::RouterSocket,
    /// Peer identity substituted when the caller sends with an empty
    /// identity — used for the monitor endpoint, which is connected rather
    /// than routed and has no peer to address by its own routing frame.
    fixed_identity: Option<Vec<u8>>,
}

impl RouterSocketWrapper {
    /// Bind a new ROUTER socket under `key` at `address` (e.g. `tcp://*:9658`).
    pub async fn bind(key: impl Into<String>, address: &str) -> Result<Self> {
        let mut socket = zeromq::RouterSocket::new();
        socket
            .bind(address)
            .await
            .with_context(|| format!("binding socket on {address}"))?;
        Ok(Self {
            key: key.into(),
            socket,
            fixed_identity: None,
        })
    }

    /// Connect a new ROUTER socket under `key` to `address`, substituting
    /// `fixed_identity` for outbound sends with no explicit target.
    pub async fn connect(key: impl Into<String>, address: &str, fixed_identity: Vec<u8>) -> Result<Self> {
        let mut socket = zeromq::RouterSocket::new();
        socket
            .connect(address)
            .await
            .with_context(|| format!("connecting socket to {address}"))?;
        Ok(Self {
            key: key.into(),
            socket,
            fixed_identity: Some(fixed_identity),
        })
    }

    /// The reactor key this socket is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Send `data` to `identity` (identity frame first, per ROUTER convention).
    pub async fn send(&mut self, identity: &[u8], data: &[Vec<u8>]) -> Result<()> {
        let identity: &[u8] = if identity.is_empty() {
            self.fixed_identity.as_deref().unwrap_or(identity)
        } else {
            identity
        };

        let mut frames = data.iter();
        let first = frames.next().context("cannot send a message with no frames")?;
        let mut msg = ZmqMessage::from(Bytes::copy_from_slice(first));
        msg.push_front(Bytes::copy_from_slice(identity));
        for frame in frames {
            msg.push_back(Bytes::copy_from_slice(frame));
        }

        self.socket
            .send(msg)
            .await
            .with_context(|| format!("sending on socket '{}'", self.key))?;
        Ok(())
    }

    /// Receive the next message, tagged with this socket's key.
    pub async fn recv(&mut self) -> Result<Message> {
        let zmq_msg = self
            .socket
            .recv()
            .await
            .with_context(|| format!("receiving on socket '{}'", self.key))?;

        let mut frames = zmq_msg.into_iter();
        let identity = frames
            .next()
            .context("router message missing leading identity frame")?
            .to_vec();
        let data = frames.map(|b| b.to_vec()).collect();

        Ok(Message {
            key: self.key.clone(),
            identity,
            data,
        })
    }
}
