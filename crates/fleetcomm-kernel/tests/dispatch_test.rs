//! End-to-end inbound dispatch: authentication, admission, business handler.

mod common;

use async_trait::async_trait;
use common::{MockContainer, MockDirectory};
use fleetcomm_kernel::{CategoryMap, CommandAuthenticator, CommandDispatcher, CommandHandler};
use fleetcomm_types::{Agent, CommandResponse, FleetError, FleetResult, InboundCommand};
use fleetcomm_wire::{ConcurrencyManager, InvocationHandler, ServiceContainer};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Echoes the payload; `fail` methods error and `block` methods wait.
#[derive(Default)]
struct EchoHandler {
    handled: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl CommandHandler for EchoHandler {
    async fn handle(&self, command: InboundCommand) -> FleetResult<serde_json::Value> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        match command.method.as_deref() {
            Some("fail") => Err(FleetError::InvalidInput("bad report".into())),
            Some("block") => {
                self.release.notified().await;
                Ok(serde_json::Value::Null)
            }
            _ => Ok(command.payload),
        }
    }
}

struct Harness {
    directory: Arc<MockDirectory>,
    container: Arc<MockContainer>,
    handler: Arc<EchoHandler>,
    dispatcher: Arc<CommandDispatcher>,
}

fn harness() -> Harness {
    let directory = Arc::new(MockDirectory::with_agent(Agent::new(
        "agent-a",
        "192.168.1.20",
        16163,
        "token-1",
    )));
    let container = Arc::new(MockContainer::default());
    let handler = Arc::new(EchoHandler::default());
    let categories = CategoryMap::agent_services()
        .with("TestService.block", fleetcomm_wire::RpcCategory::ContentDownload);
    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::new(CommandAuthenticator::new(directory.clone())),
        container.clone(),
        categories,
        handler.clone(),
    ));
    Harness {
        directory,
        container,
        handler,
        dispatcher,
    }
}

fn report(token: &str) -> InboundCommand {
    let mut command =
        InboundCommand::remote_call("MeasurementServerService", "mergeMeasurementReport")
            .with_security_token(token);
    command.payload = serde_json::json!({"values": [1, 2, 3]});
    command
}

#[tokio::test]
async fn test_authenticated_command_reaches_handler() {
    let h = harness();
    let response = h.dispatcher.dispatch(report("token-1")).await;

    assert_eq!(
        response,
        CommandResponse::Success {
            result: serde_json::json!({"values": [1, 2, 3]})
        }
    );
    assert_eq!(*h.directory.alive.lock().unwrap(), vec!["agent-a".to_string()]);

    // Second call is served from the token cache.
    h.dispatcher.dispatch(report("token-1")).await;
    assert_eq!(h.directory.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(h.handler.handled.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_bootstrap_call_needs_no_token() {
    let h = harness();
    let response = h
        .dispatcher
        .dispatch(InboundCommand::remote_call("CoreServerService", "registerAgent"))
        .await;
    assert!(matches!(response, CommandResponse::Success { .. }));
    assert_eq!(h.directory.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_token_is_rejected_before_handler() {
    let h = harness();
    let response = h.dispatcher.dispatch(report("stolen")).await;
    assert!(matches!(response, CommandResponse::Rejected { .. }));
    assert_eq!(h.handler.handled.load(Ordering::SeqCst), 0);

    let response = h
        .dispatcher
        .dispatch(InboundCommand::remote_call("MeasurementServerService", "mergeMeasurementReport"))
        .await;
    assert!(matches!(response, CommandResponse::Rejected { .. }));
}

#[tokio::test]
async fn test_directory_failure_is_rejected() {
    let h = harness();
    let response = h.dispatcher.dispatch(report("explode")).await;
    assert!(matches!(response, CommandResponse::Rejected { .. }));
}

#[tokio::test]
async fn test_handler_error_is_failure() {
    let h = harness();
    let command = InboundCommand::remote_call("TestService", "fail").with_security_token("token-1");
    match h.dispatcher.dispatch(command).await {
        CommandResponse::Failure { message } => assert!(message.contains("bad report")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_saturated_category_is_rejected_until_released() {
    let h = harness();
    let limits: BTreeMap<String, i32> = [("content-download".to_string(), 1)].into();
    h.container
        .set_concurrency_manager(Arc::new(ConcurrencyManager::new(limits)));

    let blocking = InboundCommand::remote_call("TestService", "block").with_security_token("token-1");
    let first = {
        let dispatcher = h.dispatcher.clone();
        let command = blocking.clone();
        tokio::spawn(async move { dispatcher.dispatch(command).await })
    };

    // Wait until the first call holds the only permit.
    while h.handler.handled.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    match h.dispatcher.dispatch(blocking.clone()).await {
        CommandResponse::Rejected { reason } => assert!(reason.contains("content-download")),
        other => panic!("expected rejection, got {other:?}"),
    }

    // Other categories are unaffected.
    assert!(matches!(
        h.dispatcher.dispatch(report("token-1")).await,
        CommandResponse::Success { .. }
    ));

    h.handler.release.notify_one();
    assert!(matches!(first.await.unwrap(), CommandResponse::Success { .. }));
    assert_eq!(
        h.container.current_manager().available_permits("content-download"),
        Some(1)
    );
}

#[tokio::test]
async fn test_dispatcher_as_invocation_handler() {
    let h = harness();
    let handler: Arc<dyn InvocationHandler> = h.dispatcher.clone();
    let response = handler.invoke(report("token-1")).await;
    assert!(matches!(response, CommandResponse::Success { .. }));
}
