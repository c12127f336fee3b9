use {anyhow::Result, async_trait::async_trait, tracing::debug};

use crate::{message::Message, robot::Robot, user::User};

/// Trailing callback carried alongside an outbound call; the adapter runs it
/// once the strings are delivered.
pub type SendCallback = Box<dyn FnOnce() + Send>;

/// Addressing data for an outbound call.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub room: Option<String>,
    pub user: User,
    pub message: Option<Message>,
}

impl Envelope {
    pub fn to_user(user: User) -> Self {
        Self {
            room: user.room.clone(),
            user,
            message: None,
        }
    }

    #[must_use]
    pub fn in_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }
}

/// Transport between the robot and a chat service.
///
/// `send` and `reply` are the terminal sink of the outbound pipeline. `run`
/// feeds inbound events to [`Robot::receive`] until the source is exhausted.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter identifier (e.g. "shell").
    fn name(&self) -> &str;

    async fn send(
        &self,
        envelope: &Envelope,
        strings: Vec<String>,
        callback: Option<SendCallback>,
    ) -> Result<()>;

    /// Like `send`, addressed to the envelope's user.
    async fn reply(
        &self,
        envelope: &Envelope,
        strings: Vec<String>,
        callback: Option<SendCallback>,
    ) -> Result<()>;

    /// Drive inbound events. Returns immediately by default.
    async fn run(&self, _robot: Robot) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Adapter that drops every outbound call. The default until one is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAdapter;

#[async_trait]
impl Adapter for NullAdapter {
    fn name(&self) -> &str {
        "null"
    }

    async fn send(
        &self,
        envelope: &Envelope,
        strings: Vec<String>,
        callback: Option<SendCallback>,
    ) -> Result<()> {
        debug!(room = ?envelope.room, count = strings.len(), "null adapter dropped send");
        if let Some(callback) = callback {
            callback();
        }
        Ok(())
    }

    async fn reply(
        &self,
        envelope: &Envelope,
        strings: Vec<String>,
        callback: Option<SendCallback>,
    ) -> Result<()> {
        debug!(user = %envelope.user.id, count = strings.len(), "null adapter dropped reply");
        if let Some(callback) = callback {
            callback();
        }
        Ok(())
    }
}
