//! End-to-end dispatch behavior through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{
    ApiResult, Client, DeferredInvocation, Headers, LAZY_FUNCTION_HEADER, LAZY_LISTENER_HEADER,
    LAZY_ONLY_HEADER, QueryParams, Request, Response,
};
use conduit_framework::{
    BoxedLazyRunner, DispatchOutcome, Dispatcher, DispatcherBuilder, Listener, Matcher,
    QueueInvoker, RemoteLazyRunner, TaskLazyRunner, ThreadLazyRunner, completion_fn,
    consume_queue, middleware_fn,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn counting_completion(builder: DispatcherBuilder, count: &Arc<AtomicUsize>) -> DispatcherBuilder {
    let count = Arc::clone(count);
    builder.completion_handler(completion_fn(move |_req, _resp| {
        count.fetch_add(1, Ordering::SeqCst);
    }))
}

fn app_mention() -> Request {
    Request::new(r#"{"type":"event_callback","event":{"type":"app_mention","text":"hi","user":"U1"}}"#)
        .with_headers(Headers::new().with("content-type", "application/json"))
}

async fn wait_for(count: &AtomicUsize, expected: usize) -> bool {
    for _ in 0..100 {
        if count.load(Ordering::SeqCst) == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn mention_is_handled() {
    let user = Arc::new(Mutex::new(None::<String>));
    let seen = Arc::clone(&user);
    let dispatcher = Dispatcher::builder()
        .request_verification(false)
        .listener(
            Listener::new("mention", Matcher::event_type("app_mention")).handler(move |args| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    *seen.lock() = args.context().user_id().map(str::to_owned);
                    args.ack.ack();
                    Ok(())
                })
            }),
        )
        .build();

    let resp = dispatcher.dispatch(app_mention()).await.unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(user.lock().as_deref(), Some("U1"));
}

#[tokio::test]
async fn unhandled_still_completes_once() {
    let completions = counter();
    let dispatcher = counting_completion(Dispatcher::builder().request_verification(false), &completions)
        .listener(Listener::new("command", Matcher::command("/deploy")))
        .build();

    let d = dispatcher.dispatch_detailed(app_mention()).await.unwrap();

    assert_eq!(d.outcome, DispatchOutcome::Unhandled);
    assert_eq!(d.response.status, 404);
    assert_eq!(d.response.body, r#"{"error":"unhandled request"}"#);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lazy_runs_after_ack() {
    let side_effects = counter();
    let effect = Arc::clone(&side_effects);
    let dispatcher = Dispatcher::builder()
        .request_verification(false)
        .listener(
            Listener::new("mention", Matcher::event_type("app_mention"))
                .handler(|args| {
                    Box::pin(async move {
                        args.ack.ack();
                        Ok(())
                    })
                })
                .lazy("count", move |req| {
                    let effect = Arc::clone(&effect);
                    async move {
                        assert!(req.is_lazy_only());
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        effect.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
        )
        .build();

    let d = dispatcher.dispatch_detailed(app_mention()).await.unwrap();
    assert_eq!(d.response.status, 200);
    assert_eq!(d.outcome.lazy_scheduled(), 1);
    assert_eq!(side_effects.load(Ordering::SeqCst), 0);

    assert!(wait_for(&side_effects, 1).await);
    dispatcher.shutdown().await;
    assert_eq!(side_effects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn middleware_error_is_generic_failure() {
    let completions = counter();
    let handled = counter();
    let reached = Arc::clone(&handled);
    let dispatcher = counting_completion(Dispatcher::builder().request_verification(false), &completions)
        .middleware(middleware_fn(|_req, _resp, _next| {
            Box::pin(async move { Err("database unavailable".into()) })
        }))
        .listener(
            Listener::new("mention", Matcher::event_type("app_mention")).handler(move |_args| {
                let reached = Arc::clone(&reached);
                Box::pin(async move {
                    reached.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .build();

    let d = dispatcher.dispatch_detailed(app_mention()).await.unwrap();

    assert_eq!(d.response.status, 500);
    assert!(d.response.body.is_empty());
    assert!(matches!(d.outcome, DispatchOutcome::Failed { kind: "middleware", listener: None, .. }));
    assert_eq!(handled.load(Ordering::SeqCst), 0);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deferred_payload_round_trip() {
    let original = Request::new(&b"payload=%7B%22type%22%3A%22block_actions%22%7D"[..])
        .with_headers(
            Headers::new()
                .with("Content-Type", "application/x-www-form-urlencoded")
                .with("X-Slack-Signature", "v0=abc"),
        )
        .with_query(QueryParams::parse("a=1&a=2&b=3"));
    let snapshot = DeferredInvocation::snapshot(&original, "actions", "notify");

    let wire = snapshot.to_json().unwrap();
    let rebuilt = DeferredInvocation::from_json(&wire).unwrap().into_request();

    assert_eq!(rebuilt.raw_body(), original.raw_body());
    assert_eq!(rebuilt.headers(), &snapshot.headers);
    assert_eq!(rebuilt.query(), original.query());
    assert_eq!(rebuilt.body(), original.body());
    assert_eq!(rebuilt.body()["type"], "block_actions");
    assert!(rebuilt.is_lazy_only());
}

#[tokio::test]
async fn binary_bodies_survive_the_wire() {
    let original = Request::new(vec![0xff, 0x00, 0xfe, 0x7b]);
    let snapshot = DeferredInvocation::snapshot(&original, "files", "binary");
    let payload = snapshot.to_payload();
    assert!(payload.is_base64_encoded);

    let rebuilt = DeferredInvocation::from_json(&snapshot.to_json().unwrap())
        .unwrap()
        .into_request();
    assert_eq!(rebuilt.raw_body(), original.raw_body());
    assert!(rebuilt.body().is_empty());
}

#[tokio::test]
async fn completion_runs_exactly_once_on_every_path() {
    let completions = counter();
    let dispatcher = counting_completion(Dispatcher::builder().request_verification(false), &completions)
        .middleware(middleware_fn(|req, resp, next| {
            Box::pin(async move {
                if req.body().get("stop").is_some() {
                    return Ok(Response::text(200, "stopped"));
                }
                if req.body().get("explode").is_some() {
                    return Err("exploded".into());
                }
                next.run(req, resp).await
            })
        }))
        .listener(
            Listener::new("fails", Matcher::command("/fail"))
                .handler(|_args| Box::pin(async move { Err("handler failed".into()) })),
        )
        .listener(Listener::new("ok", Matcher::command("/ok")).lazy("later", |_req| async { Ok(()) }))
        .build();

    let requests = [
        Request::new(r#"{"stop":true}"#),
        Request::new(r#"{"explode":true}"#),
        Request::new("command=%2Ffail"),
        Request::new("command=%2Fok"),
        Request::new("command=%2Fnobody"),
        DeferredInvocation::snapshot(&Request::new("command=%2Fok"), "ok", "later").into_request(),
    ];
    let total = requests.len();
    for req in requests {
        dispatcher.dispatch(req).await.unwrap();
    }
    dispatcher.shutdown().await;

    assert_eq!(completions.load(Ordering::SeqCst), total);
}

#[tokio::test]
async fn first_registered_listener_wins() {
    let first = counter();
    let second = counter();
    let (f, s) = (Arc::clone(&first), Arc::clone(&second));
    let dispatcher = Dispatcher::builder()
        .request_verification(false)
        .listener(Listener::new("l1", Matcher::event_type("app_mention")).handler(move |_args| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
        .listener(Listener::new("l2", Matcher::regex_text("hi").unwrap()).handler(move |_args| {
            let s = Arc::clone(&s);
            Box::pin(async move {
                s.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
        .build();

    let d = dispatcher.dispatch_detailed(app_mention()).await.unwrap();

    assert_eq!(d.outcome.listener(), Some("l1"));
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn short_circuit_skips_matching() {
    let evaluated = counter();
    let seen = Arc::clone(&evaluated);
    let dispatcher = Dispatcher::builder()
        .request_verification(false)
        .middleware(middleware_fn(|_req, _resp, _next| {
            Box::pin(async move { Ok(Response::text(200, "cached")) })
        }))
        .listener(Listener::new(
            "spy",
            Matcher::custom(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                true
            }),
        ))
        .build();

    let d = dispatcher.dispatch_detailed(app_mention()).await.unwrap();

    assert_eq!(d.outcome, DispatchOutcome::ShortCircuited);
    assert_eq!(d.response.body, "cached");
    assert_eq!(evaluated.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_bodies_never_break_matching() {
    let dispatcher = Dispatcher::builder()
        .request_verification(false)
        .listener(Listener::new("event", Matcher::event_type("message")))
        .listener(Listener::new("payload", Matcher::payload_type("block_actions")))
        .listener(Listener::new("command", Matcher::command("/x")))
        .listener(Listener::new("text", Matcher::regex_text(".*").unwrap()))
        .build();

    for raw in ["", "not json at all", "{broken", "[1,2,3]"] {
        let d = dispatcher.dispatch_detailed(Request::new(raw)).await.unwrap();
        assert_eq!(d.outcome, DispatchOutcome::Unhandled, "body {raw:?}");
    }
}

#[tokio::test]
async fn body_is_decoded_once() {
    let req = app_mention();
    let first = req.body() as *const _;
    let second = req.body() as *const _;
    assert!(std::ptr::eq(first, second));
    assert_eq!(req.body()["event"]["user"], json!("U1"));
}

#[tokio::test]
async fn remote_runner_reaches_consumer_through_queue() {
    let hits = counter();
    let listener = {
        let hits = Arc::clone(&hits);
        Listener::new("mention", Matcher::event_type("app_mention")).lazy("remote_count", move |req| {
            let hits = Arc::clone(&hits);
            async move {
                assert_eq!(req.context().user_id(), Some("U1"));
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };

    let (invoker, rx) = QueueInvoker::channel(8);
    let front = Dispatcher::builder()
        .request_verification(false)
        .lazy_runner(RemoteLazyRunner::new(invoker))
        .listener(listener.clone())
        .build();
    let back = Dispatcher::builder()
        .request_verification(false)
        .listener(listener)
        .build();
    let consumer = tokio::spawn(consume_queue(rx, back));

    let resp = front.dispatch(app_mention()).await.unwrap();
    assert_eq!(resp.status, 200);

    assert!(wait_for(&hits, 1).await);
    front.shutdown().await;
    drop(front);
    consumer.await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

struct NullClient;

#[async_trait]
impl Client for NullClient {
    async fn call_api(&self, _method: &str, _params: Value) -> ApiResult<Value> {
        Ok(Value::Null)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

/// What a lazy function found in its context.
#[derive(Debug, PartialEq)]
struct LazyView {
    has_client: bool,
    token: Option<String>,
    request_id: String,
}

type Views = Arc<Mutex<Vec<LazyView>>>;

fn inspecting_listener(views: &Views) -> Listener {
    let views = Arc::clone(views);
    Listener::new("mention", Matcher::event_type("app_mention")).lazy("inspect", move |req| {
        let views = Arc::clone(&views);
        async move {
            let ctx = req.context();
            views.lock().push(LazyView {
                has_client: ctx.client().is_some(),
                token: ctx.token().map(str::to_owned),
                request_id: ctx.request_id().to_owned(),
            });
            Ok(())
        }
    })
}

fn seeded_builder() -> DispatcherBuilder {
    Dispatcher::builder()
        .request_verification(false)
        .client(Arc::new(NullClient))
        .token("xoxb-lazy")
}

fn mention_with_id(request_id: &str) -> Request {
    let mut req = app_mention();
    req.context_mut().set_request_id(request_id);
    req
}

fn expected_view(request_id: &str) -> LazyView {
    LazyView {
        has_client: true,
        token: Some("xoxb-lazy".into()),
        request_id: request_id.into(),
    }
}

#[tokio::test]
async fn in_process_lazy_functions_see_client_token_and_request_id() {
    let runners: [BoxedLazyRunner; 2] = [
        Arc::new(TaskLazyRunner::new()),
        Arc::new(ThreadLazyRunner::with_max_threads(2)),
    ];
    for runner in runners {
        let views: Views = Arc::default();
        let name = runner.name().to_owned();
        let dispatcher = seeded_builder()
            .lazy_runner_arc(runner)
            .listener(inspecting_listener(&views))
            .build();

        dispatcher.dispatch(mention_with_id("req-42")).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(*views.lock(), vec![expected_view("req-42")], "runner {name}");
    }
}

#[tokio::test]
async fn deferred_lazy_function_sees_consumer_client_and_token() {
    let views: Views = Arc::default();
    let (invoker, rx) = QueueInvoker::channel(8);
    // the front has no client; live handles never cross the queue
    let front = Dispatcher::builder()
        .request_verification(false)
        .lazy_runner(RemoteLazyRunner::new(invoker))
        .listener(inspecting_listener(&views))
        .build();
    let back = seeded_builder().listener(inspecting_listener(&views)).build();
    let consumer = tokio::spawn(consume_queue(rx, back));

    front.dispatch(mention_with_id("req-43")).await.unwrap();
    for _ in 0..100 {
        if !views.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    front.shutdown().await;
    drop(front);
    consumer.await.unwrap();

    assert_eq!(*views.lock(), vec![expected_view("req-43")]);
}

#[tokio::test]
async fn forged_lazy_markers_still_need_a_signature() {
    let views: Views = Arc::default();
    let completions = counter();
    let dispatcher = counting_completion(
        Dispatcher::builder().signing_secret("secret"),
        &completions,
    )
    .listener(inspecting_listener(&views))
    .build();

    let forged = app_mention().with_headers(
        Headers::new()
            .with("content-type", "application/json")
            .with(LAZY_ONLY_HEADER, "1")
            .with(LAZY_LISTENER_HEADER, "mention")
            .with(LAZY_FUNCTION_HEADER, "inspect"),
    );
    let d = dispatcher.dispatch_detailed(forged).await.unwrap();
    dispatcher.shutdown().await;

    assert_eq!(d.response.status, 401);
    assert!(matches!(d.outcome, DispatchOutcome::Failed { kind: "validation", .. }));
    assert!(views.lock().is_empty());
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shared_lazy_names_stay_with_their_listener() {
    let a = counter();
    let b = counter();
    let counting = |name: &str, matcher: Matcher, hits: &Arc<AtomicUsize>| {
        let hits = Arc::clone(hits);
        Listener::new(name, matcher).lazy("notify", move |_req| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    let dispatcher = Dispatcher::builder()
        .request_verification(false)
        .listener(counting("a", Matcher::command("/a"), &a))
        .listener(counting("b", Matcher::command("/b"), &b))
        .build();

    // the normal path snapshots under the matched listener
    dispatcher.dispatch(Request::new("command=%2Fb")).await.unwrap();
    dispatcher.shutdown().await;
    assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst)), (0, 1));

    let wire = DeferredInvocation::snapshot(&Request::new("command=%2Fa"), "a", "notify")
        .to_json()
        .unwrap();
    let d = dispatcher.dispatch_deferred(&wire).await.unwrap();
    assert_eq!(d.status, 200);
    assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst)), (1, 1));
}
