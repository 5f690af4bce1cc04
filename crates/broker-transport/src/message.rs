//! The multipart message shape that flows through the reactor.

/// A single opaque frame of a multipart message.
pub type Frame = Vec<u8>;

/// A message in flight through the reactor: either freshly received from a
/// socket (`key` names the socket, `identity` is the sender's routing token)
/// or constructed by a handler to be sent out (`key` names the destination
/// socket or handler, `identity` is the target peer).
#[derive(Debug, Clone)]
pub struct Message {
    /// Logical origin or destination: a socket key (`"clients"`, `"workers"`,
    /// `"monitor"`), an async handler key (`"status_notifier"`), or the
    /// synthetic `"timer"` key.
    pub key: String,
    /// Peer routing identity. Empty for messages with no addressable peer
    /// (e.g. a timer tick, or a monitor send when the transport needs none).
    pub identity: Vec<u8>,
    /// Ordered payload frames, command frame first by convention.
    pub data: Vec<Frame>,
}

impl Message {
    /// Build a message from owned frames.
    pub fn new(key: impl Into<String>, identity: impl Into<Vec<u8>>, data: Vec<Frame>) -> Self {
        Self {
            key: key.into(),
            identity: identity.into(),
            data,
        }
    }

    /// Build a message from string frames, for the common text-protocol case.
    pub fn text(key: impl Into<String>, identity: impl Into<Vec<u8>>, frames: &[&str]) -> Self {
        Self::new(
            key,
            identity,
            frames.iter().map(|f| f.as_bytes().to_vec()).collect(),
        )
    }

    /// Frame at `index` interpreted as UTF-8 text.
    pub fn frame_str(&self, index: usize) -> Option<&str> {
        self.data.get(index).and_then(|f| std::str::from_utf8(f).ok())
    }

    /// The leading command frame (`"init"`, `"eval"`, `"done"`, ...), if any.
    pub fn command(&self) -> Option<&str> {
        self.frame_str(0)
    }
}
