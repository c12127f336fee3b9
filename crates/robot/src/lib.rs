//! Listener dispatch and middleware engine.
//!
//! Inbound messages pass through receive middleware, then each registered
//! listener in order; a matching listener runs its own listener middleware
//! before its callback. Replies made through a [`Response`] pass through
//! response middleware before reaching the [`Adapter`]. Messages no listener
//! handled get one more pass as [`Message::CatchAll`].

pub mod adapter;
pub mod brain;
pub mod context;
pub mod error;
pub mod listener;
pub mod message;
pub mod pipeline;
pub mod response;
pub mod robot;
pub mod user;

pub use {
    adapter::{Adapter, Envelope, NullAdapter, SendCallback},
    brain::{Brain, BrainData, BrainEvent},
    context::{ListenerContext, Method, ReceiveContext, ResponseContext},
    error::{Error, Result},
    listener::{
        AsyncHandlerFn, Handler, HandlerFn, Listener, ListenerBuilder, ListenerOptions, Match,
        Matcher, TextMatcher, async_handler_fn, handler_fn,
    },
    message::{CatchAllMessage, GenericMessage, Message, TextMessage},
    pipeline::{Execution, FnMiddleware, Middleware, Next, Pipeline, UnwindStack, from_fn},
    response::{Delivery, Response},
    robot::{ErrorObserver, Robot, RobotBuilder, respond_pattern},
    user::User,
};
