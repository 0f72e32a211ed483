//! Where failed attempts are logged

mod support;

use std::{
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
};

use courier_common::logging::{BACKGROUND_TARGET, FOREGROUND_TARGET};
use courier_store::MemoryRecordStore;
use pretty_assertions::assert_eq;
use support::{RejectingOverride, account, accounts, dispatcher, new_record};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{
    Layer,
    layer::{Context, SubscriberExt},
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Failure {
    target: String,
    level: Level,
    queue_id: Option<String>,
}

/// Keeps every event logged on a queue failure target
#[derive(Debug, Clone, Default)]
struct FailureLayer {
    failures: Arc<Mutex<Vec<Failure>>>,
}

impl FailureLayer {
    fn failures(&self) -> Vec<Failure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Default)]
struct QueueIdVisitor(Option<String>);

impl Visit for QueueIdVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "queue_id" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for FailureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if target != BACKGROUND_TARGET && target != FOREGROUND_TARGET {
            return;
        }

        let mut visitor = QueueIdVisitor::default();
        event.record(&mut visitor);

        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Failure {
                target: target.to_string(),
                level: *event.metadata().level(),
                queue_id: visitor.0,
            });
    }
}

#[tokio::test]
async fn test_failures_are_tagged_by_origin() {
    let layer = FailureLayer::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer.clone()));

    let store = Arc::new(MemoryRecordStore::new());
    let dispatcher = dispatcher(store, accounts(account(1)))
        .send_override(Arc::new(RejectingOverride {
            reject: vec!["a@x.com".to_string()],
            ..Default::default()
        }))
        .build();

    let background = dispatcher
        .enqueue(new_record(&["a@x.com"]))
        .await
        .expect("enqueue")
        .expect("id");
    let foreground = dispatcher
        .enqueue(new_record(&["a@x.com"]))
        .await
        .expect("enqueue")
        .expect("id");

    dispatcher.send(&background, true).await.expect("background send");
    dispatcher.send(&foreground, false).await.expect("foreground send");

    assert_eq!(
        layer.failures(),
        vec![
            Failure {
                target: BACKGROUND_TARGET.to_string(),
                level: Level::ERROR,
                queue_id: Some(background.to_string()),
            },
            Failure {
                target: FOREGROUND_TARGET.to_string(),
                level: Level::ERROR,
                queue_id: Some(foreground.to_string()),
            },
        ]
    );
}

#[tokio::test]
async fn test_transport_failures_are_warnings() {
    let layer = FailureLayer::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer.clone()));

    let unused = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = unused.local_addr().expect("addr").port();
    drop(unused);

    let store = Arc::new(MemoryRecordStore::new());
    let dispatcher = dispatcher(store, accounts(account(port))).build();
    let id = dispatcher
        .enqueue(new_record(&["a@x.com"]))
        .await
        .expect("enqueue")
        .expect("id");

    dispatcher.send(&id, true).await.expect_err("nothing listening");

    assert_eq!(
        layer.failures(),
        vec![Failure {
            target: BACKGROUND_TARGET.to_string(),
            level: Level::WARN,
            queue_id: Some(id.to_string()),
        }]
    );
}
