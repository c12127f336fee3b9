//! Inbound message variants.
//!
//! Cloning a [`Message`] yields a second handle to the same message: the
//! `done` flag is shared, so a listener that calls [`Message::finish`] on its
//! copy stops the dispatch loop that holds the original.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use regex::Regex;

use crate::{listener::Match, user::User};

/// Monotonic "no further listeners" flag shared by clones of one message.
#[derive(Debug, Clone, Default)]
struct DoneFlag(Arc<AtomicBool>);

impl DoneFlag {
    fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Any inbound event the adapter hands to the robot.
#[derive(Debug, Clone)]
pub enum Message {
    Generic(GenericMessage),
    Text(TextMessage),
    CatchAll(CatchAllMessage),
}

/// An event with no matchable content (joins, topic changes, reactions).
#[derive(Debug, Clone)]
pub struct GenericMessage {
    pub user: User,
    pub room: Option<String>,
    pub id: Option<String>,
    done: DoneFlag,
}

/// A chat line.
#[derive(Debug, Clone)]
pub struct TextMessage {
    pub user: User,
    pub room: Option<String>,
    pub text: String,
    pub id: Option<String>,
    done: DoneFlag,
}

/// Wraps a message that no listener handled.
///
/// Only built by [`Message::into_catch_all`], which refuses to wrap another
/// catch-all, so nesting is at most one level deep. The wrapper shares the
/// wrapped message's `done` flag, so a fallback listener that finishes the
/// unwrapped message also stops the fallback pass.
#[derive(Debug, Clone)]
pub struct CatchAllMessage {
    original: Box<Message>,
    done: DoneFlag,
}

impl GenericMessage {
    pub fn new(user: User) -> Self {
        Self {
            room: user.room.clone(),
            user,
            id: None,
            done: DoneFlag::default(),
        }
    }
}

impl TextMessage {
    pub fn new(user: User, text: impl Into<String>) -> Self {
        Self {
            room: user.room.clone(),
            user,
            text: text.into(),
            id: None,
            done: DoneFlag::default(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Run `pattern` against the text, returning its capture groups.
    pub fn match_pattern(&self, pattern: &Regex) -> Option<Match> {
        pattern.captures(&self.text).map(|caps| Match::from_captures(&caps))
    }
}

impl CatchAllMessage {
    /// The message nothing matched.
    pub fn message(&self) -> &Message {
        &self.original
    }

    pub fn into_inner(self) -> Message {
        *self.original
    }
}

impl From<GenericMessage> for Message {
    fn from(message: GenericMessage) -> Self {
        Self::Generic(message)
    }
}

impl From<TextMessage> for Message {
    fn from(message: TextMessage) -> Self {
        Self::Text(message)
    }
}

impl Message {
    pub fn text(user: User, text: impl Into<String>) -> Self {
        Self::Text(TextMessage::new(user, text))
    }

    pub fn generic(user: User) -> Self {
        Self::Generic(GenericMessage::new(user))
    }

    /// Wrap this message for the fallback pass.
    ///
    /// Returns `None` when the message already is a catch-all.
    pub fn into_catch_all(self) -> Option<Self> {
        match self {
            Self::CatchAll(_) => None,
            other => Some(Self::CatchAll(CatchAllMessage {
                done: other.done_flag().clone(),
                original: Box::new(other),
            })),
        }
    }

    pub fn user(&self) -> &User {
        match self {
            Self::Generic(m) => &m.user,
            Self::Text(m) => &m.user,
            Self::CatchAll(m) => m.original.user(),
        }
    }

    pub fn room(&self) -> Option<&str> {
        match self {
            Self::Generic(m) => m.room.as_deref(),
            Self::Text(m) => m.room.as_deref(),
            Self::CatchAll(m) => m.original.room(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Generic(m) => m.id.as_deref(),
            Self::Text(m) => m.id.as_deref(),
            Self::CatchAll(m) => m.original.id(),
        }
    }

    pub fn as_text(&self) -> Option<&TextMessage> {
        match self {
            Self::Text(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut TextMessage> {
        match self {
            Self::Text(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, Self::CatchAll(_))
    }

    /// Short variant name for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Generic(_) => "generic",
            Self::Text(_) => "text",
            Self::CatchAll(_) => "catch_all",
        }
    }

    /// Stop any further listener from seeing this message.
    pub fn finish(&self) {
        self.done_flag().set();
    }

    pub fn is_done(&self) -> bool {
        self.done_flag().get()
    }

    fn done_flag(&self) -> &DoneFlag {
        match self {
            Self::Generic(m) => &m.done,
            Self::Text(m) => &m.done,
            Self::CatchAll(m) => &m.done,
        }
    }
}
