use super::common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::workflows::notify::correlator::ReplyError;
use crate::workflows::notify::dispatcher::WebhookTarget;
use crate::workflows::notify::inbound::{
    CallbackBoundary, CallbackOutcome, InboundHandler, InboundMessage,
};
use crate::workflows::notify::service::PushError;

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail,
    Panic,
}

struct ScriptedHandler {
    behaviour: Behaviour,
    reply_fails: bool,
    handled: AtomicUsize,
    replies: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            reply_fails: false,
            handled: AtomicUsize::new(0),
            replies: Mutex::new(Vec::new()),
        }
    }

    fn replies(&self) -> Vec<String> {
        self.replies.lock().expect("replies mutex poisoned").clone()
    }
}

#[async_trait]
impl InboundHandler for ScriptedHandler {
    async fn handle(&self, _message: &InboundMessage) -> Result<(), PushError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err(PushError::Reply(ReplyError::NoSession)),
            Behaviour::Panic => panic!("send on closed channel"),
        }
    }

    async fn reply_text(&self, _message: &InboundMessage, text: &str) -> Result<(), PushError> {
        self.replies
            .lock()
            .expect("replies mutex poisoned")
            .push(text.to_string());
        if self.reply_fails {
            return Err(PushError::NotConfigured);
        }
        Ok(())
    }
}

fn message(content: &str) -> InboundMessage {
    InboundMessage {
        content: content.to_string(),
        sender_id: "hr-007".to_string(),
        session_webhook: Some(REPLY_HOOK.to_string()),
    }
}

#[tokio::test]
async fn panics_are_contained_and_never_answered() {
    let handler = Arc::new(ScriptedHandler::new(Behaviour::Panic));
    let boundary = CallbackBoundary::new(handler.clone());

    let outcome = boundary.deliver(message("1")).await;

    assert_eq!(
        outcome,
        CallbackOutcome::Panicked("send on closed channel".to_string())
    );
    assert!(handler.replies().is_empty());
}

#[tokio::test]
async fn handler_errors_are_answered_exactly_once() {
    let handler = Arc::new(ScriptedHandler::new(Behaviour::Fail));
    let boundary = CallbackBoundary::new(handler.clone());

    let outcome = boundary.deliver(message("1")).await;

    assert_eq!(
        outcome,
        CallbackOutcome::Failed("暂无候选人列表，请先推送候选人".to_string())
    );
    assert_eq!(
        handler.replies(),
        vec!["处理失败: 暂无候选人列表，请先推送候选人".to_string()]
    );
}

#[tokio::test]
async fn failing_error_reply_does_not_escape() {
    let handler = Arc::new(ScriptedHandler {
        reply_fails: true,
        ..ScriptedHandler::new(Behaviour::Fail)
    });
    let boundary = CallbackBoundary::new(handler.clone());

    let outcome = boundary.deliver(message("1")).await;

    assert!(matches!(outcome, CallbackOutcome::Failed(_)));
    assert_eq!(handler.replies().len(), 1);
}

#[tokio::test]
async fn listener_drains_channel_until_closed() {
    let handler = Arc::new(ScriptedHandler::new(Behaviour::Succeed));
    let (sender, receiver) = mpsc::channel(4);
    let listener = CallbackBoundary::new(handler.clone()).spawn_listener(receiver);

    sender.send(message("1")).await.expect("listener alive");
    sender.send(message("2")).await.expect("listener alive");
    drop(sender);
    listener.await.expect("listener exits cleanly");

    assert_eq!(handler.handled.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn out_of_range_reply_is_answered_through_the_session_hook() {
    let fx = fixture(vec![record(7, "张三", 91.0)]);
    fx.service.push_manual(OWNER).await.expect("push succeeds");
    let boundary = CallbackBoundary::new(fx.service.clone());

    let outcome = boundary.deliver(message("9")).await;

    assert_eq!(
        outcome,
        CallbackOutcome::Failed("序号 9 超出范围，请输入 1-1".to_string())
    );
    assert_eq!(
        fx.dispatcher.sent().last(),
        Some(&Sent::Text {
            target: WebhookTarget::unsigned(REPLY_HOOK),
            content: "处理失败: 序号 9 超出范围，请输入 1-1".to_string(),
        })
    );
}
