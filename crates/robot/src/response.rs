//! The handle a listener uses to talk back.

use std::fmt;

use {
    rand::seq::IndexedRandom,
    tracing::{debug, trace},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, labels, outbound as outbound_metrics};

use crate::{
    adapter::{Envelope, SendCallback},
    context::{Method, ResponseContext},
    error::Error,
    listener::Match,
    message::Message,
    pipeline::Execution,
    robot::Robot,
};

/// How an outbound call ended. Failures have already been reported to the
/// robot's error observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The adapter accepted the strings.
    Sent,
    /// Response middleware halted the call; nothing reached the adapter.
    Vetoed,
    /// Response middleware or the adapter failed.
    Failed,
}

/// A message paired with the robot that received it and, for listener
/// callbacks, the match that selected the listener.
///
/// Clones share the message's `done` flag.
#[derive(Clone)]
pub struct Response {
    robot: Robot,
    pub message: Message,
    pub matched: Option<Match>,
}

impl Response {
    pub fn new(robot: Robot, message: Message, matched: Option<Match>) -> Self {
        Self {
            robot,
            message,
            matched,
        }
    }

    pub fn robot(&self) -> &Robot {
        &self.robot
    }

    /// Capture group `index` of the match, if any.
    pub fn group(&self, index: usize) -> Option<&str> {
        self.matched.as_ref()?.get(index)
    }

    pub fn envelope(&self) -> Envelope {
        Envelope {
            room: self.message.room().map(str::to_string),
            user: self.message.user().clone(),
            message: Some(self.message.clone()),
        }
    }

    /// Post `strings` to the message's room through response middleware.
    pub async fn send<I, S>(&self, strings: I) -> Delivery
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deliver(Method::Send, collect(strings), None).await
    }

    /// Post `strings` addressed to the message's sender.
    pub async fn reply<I, S>(&self, strings: I) -> Delivery
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deliver(Method::Reply, collect(strings), None).await
    }

    /// [`Response::send`] with a callback the adapter runs after delivery.
    pub async fn send_with<I, S>(&self, strings: I, callback: impl FnOnce() + Send + 'static) -> Delivery
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deliver(Method::Send, collect(strings), Some(Box::new(callback)))
            .await
    }

    pub async fn reply_with<I, S>(&self, strings: I, callback: impl FnOnce() + Send + 'static) -> Delivery
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deliver(Method::Reply, collect(strings), Some(Box::new(callback)))
            .await
    }

    /// Pick one of `items` at random.
    pub fn random<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut rand::rng())
    }

    /// Stop any later listener from seeing this message.
    pub fn finish(&self) {
        self.message.finish();
    }

    async fn deliver(
        &self,
        method: Method,
        strings: Vec<String>,
        callback: Option<SendCallback>,
    ) -> Delivery {
        let mut ctx = ResponseContext {
            response: self.clone(),
            strings,
            method,
            plaintext: true,
        };

        match self.robot.response_middleware().execute(&mut ctx).await {
            Execution::Complete(unwind) => unwind.run(&mut ctx),
            Execution::Halted => {
                debug!(%method, "outbound call vetoed by response middleware");
                #[cfg(feature = "metrics")]
                counter!(outbound_metrics::VETOED_TOTAL, labels::METHOD => method.as_str())
                    .increment(1);
                return Delivery::Vetoed;
            },
            Execution::Failed(err) => {
                self.robot.report_error(&err, self);
                return Delivery::Failed;
            },
        }

        let strings = ctx.strings;
        let count = strings.len();
        let envelope = self.envelope();
        let adapter = self.robot.adapter();
        trace!(%method, count, adapter = adapter.name(), "handing strings to adapter");
        let result = match method {
            Method::Send => adapter.send(&envelope, strings, callback).await,
            Method::Reply => adapter.reply(&envelope, strings, callback).await,
        };

        match result {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                counter!(outbound_metrics::STRINGS_SENT_TOTAL, labels::METHOD => method.as_str())
                    .increment(count as u64);
                Delivery::Sent
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(outbound_metrics::ADAPTER_ERRORS_TOTAL, labels::METHOD => method.as_str())
                    .increment(1);
                self.robot.report_error(&Error::adapter(method.as_str(), e), self);
                Delivery::Failed
            },
        }
    }
}

fn collect<I, S>(strings: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    strings.into_iter().map(Into::into).collect()
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("robot", &self.robot.name())
            .field("message", &self.message)
            .field("matched", &self.matched)
            .finish()
    }
}
