//! Scripts bundled with the binary.

use {
    herald_robot::{
        ListenerOptions, Next, ReceiveContext, Response, RobotBuilder, async_handler_fn, from_fn,
    },
    time::OffsetDateTime,
    tracing::debug,
};

/// Register the built-in listeners and a receive stage that logs each
/// inbound message.
pub fn register(builder: &mut RobotBuilder) -> herald_robot::Result<()> {
    builder.receive_middleware(from_fn(|ctx: &mut ReceiveContext| {
        let message = &ctx.response.message;
        debug!(
            kind = message.kind(),
            user = %message.user().id,
            id = message.id().unwrap_or_default(),
            "inbound message"
        );
        Ok(Next::Continue)
    }));

    builder
        .respond(
            "(?i)ping$",
            ListenerOptions::with_id("ping"),
            async_handler_fn(|res: Response| async move {
                res.send(["PONG"]).await;
                anyhow::Ok(())
            }),
        )?
        .respond(
            "(?i)echo (.+)$",
            ListenerOptions::with_id("echo"),
            async_handler_fn(|res: Response| async move {
                let text = res.group(1).unwrap_or_default().to_string();
                res.send([text]).await;
                anyhow::Ok(())
            }),
        )?
        .respond(
            "(?i)time$",
            ListenerOptions::with_id("time"),
            async_handler_fn(|res: Response| async move {
                let now = OffsetDateTime::now_utc();
                res.send([format!(
                    "Server time is: {} {:02}:{:02}:{:02} UTC",
                    now.date(),
                    now.hour(),
                    now.minute(),
                    now.second()
                )])
                .await;
                anyhow::Ok(())
            }),
        )?
        .catch_all(
            ListenerOptions::with_id("fallback"),
            async_handler_fn(|res: Response| async move {
                let reply = match res.message.as_text() {
                    Some(text) => format!("I didn't understand \"{}\".", text.text),
                    None => "I didn't understand that.".to_string(),
                };
                res.reply([reply]).await;
                anyhow::Ok(())
            }),
        );
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use {
        anyhow::Result,
        async_trait::async_trait,
        herald_robot::{Adapter, Envelope, Message, Method, Robot, SendCallback, User},
        rstest::rstest,
    };

    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<(Method, String)>>);

    impl Capture {
        fn take(&self) -> Vec<(Method, String)> {
            std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
        }
    }

    #[async_trait]
    impl Adapter for Capture {
        fn name(&self) -> &str {
            "capture"
        }

        async fn send(&self, _: &Envelope, strings: Vec<String>, _: Option<SendCallback>) -> Result<()> {
            let mut calls = self.0.lock().unwrap_or_else(|e| e.into_inner());
            calls.extend(strings.into_iter().map(|s| (Method::Send, s)));
            Ok(())
        }

        async fn reply(&self, _: &Envelope, strings: Vec<String>, _: Option<SendCallback>) -> Result<()> {
            let mut calls = self.0.lock().unwrap_or_else(|e| e.into_inner());
            calls.extend(strings.into_iter().map(|s| (Method::Reply, s)));
            Ok(())
        }
    }

    fn robot() -> (Robot, Arc<Capture>) {
        let capture = Arc::new(Capture::default());
        let mut builder = Robot::builder("herald");
        builder.alias("/").shared_adapter(capture.clone());
        register(&mut builder).unwrap();
        (builder.build().unwrap(), capture)
    }

    async fn say(robot: &Robot, text: &str) {
        robot
            .receive(Message::text(User::new("1").with_room("Shell"), text))
            .await;
    }

    #[rstest]
    #[case("herald ping", "PONG")]
    #[case("/PING", "PONG")]
    #[case("@herald: echo hello there", "hello there")]
    #[tokio::test]
    async fn addressed_commands(#[case] input: &str, #[case] expected: &str) {
        let (robot, capture) = robot();
        say(&robot, input).await;
        assert_eq!(capture.take(), [(Method::Send, expected.to_string())]);
    }

    #[tokio::test]
    async fn time_reports_utc() {
        let (robot, capture) = robot();
        say(&robot, "herald time").await;
        let calls = capture.take();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.starts_with("Server time is: "));
        assert!(calls[0].1.ends_with(" UTC"));
    }

    #[tokio::test]
    async fn unaddressed_text_falls_back() {
        let (robot, capture) = robot();
        say(&robot, "ping").await;
        assert_eq!(capture.take(), [(
            Method::Reply,
            "I didn't understand \"ping\".".to_string()
        )]);
    }
}
