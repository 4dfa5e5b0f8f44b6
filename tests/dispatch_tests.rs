mod common;

use http::Method;
use manifold::app::{Application, MultiAppDispatcher};
use manifold::context::{BufferedWriter, Context};
use manifold::dispatch::{ExecutionMode, HandlerResult, ResponsePayload};
use manifold::error::{DefaultErrorHandler, ErrorHandler, HandlerError};
use manifold::router::Route;
use manifold::runtime_config::RuntimeConfig;
use manifold::server::{HttpHandler, RawRequest};
use may::sync::mpsc;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn dispatcher_with(route: Route) -> MultiAppDispatcher {
    let mut dispatcher = MultiAppDispatcher::new(RuntimeConfig::default());
    dispatcher.mount(Application::new("test").route(route));
    dispatcher
}

#[test]
fn inline_handler_writes_through_context() {
    common::setup();
    let route = Route::new(Method::GET, "/greet/{name}", |ctx: &mut Context| {
        let name = ctx.path_param("name").unwrap_or("?").to_string();
        ctx.send_text(&format!("hi {name}"));
        HandlerResult::Done
    })
    .unwrap();
    let dispatcher = dispatcher_with(route);

    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/greet/ada"), Box::new(writer));
    let rec = shared.snapshot();
    assert_eq!(rec.status, 200);
    assert_eq!(rec.body_text(), "hi ada");
    assert!(rec.finished);
}

#[test]
fn immediate_payload_is_written_and_finalized() {
    common::setup();
    let route = Route::new(Method::GET, "/payload", |_: &mut Context| {
        HandlerResult::Immediate(
            ResponsePayload::new(201, json!({"ok": true})).with_header("X-Origin", "payload"),
        )
    })
    .unwrap();
    let dispatcher = dispatcher_with(route);

    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/payload"), Box::new(writer));
    let rec = shared.snapshot();
    assert_eq!(rec.status, 201);
    assert_eq!(rec.header("X-Origin"), Some("payload"));
    assert_eq!(rec.header("Content-Type"), Some("application/json; charset=utf-8"));
    assert_eq!(rec.body_text(), "{\"ok\":true}");
}

#[test]
fn worker_execution_completes_off_the_caller() {
    common::setup();
    let route = Route::new(Method::GET, "/work", |ctx: &mut Context| {
        ctx.send_text("done on worker");
        HandlerResult::Done
    })
    .unwrap()
    .with_execution(ExecutionMode::Worker);
    let dispatcher = dispatcher_with(route);

    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/work"), Box::new(writer));
    let rec = shared.wait_finished(WAIT).expect("worker never finished");
    assert_eq!(rec.body_text(), "done on worker");
}

#[test]
fn submissions_past_the_queue_bound_still_complete() {
    common::setup();
    let route = Route::new(Method::GET, "/slow/{n}", |ctx: &mut Context| {
        let n = ctx.path_param("n").unwrap_or("?").to_string();
        may::coroutine::sleep(Duration::from_millis(10));
        ctx.send_text(&format!("ok {n}"));
        HandlerResult::Done
    })
    .unwrap()
    .with_execution(ExecutionMode::Worker);
    let config = RuntimeConfig {
        stack_size: 0x8000,
        workers: 1,
        queue_bound: 2,
    };
    let mut dispatcher = MultiAppDispatcher::new(config);
    dispatcher.mount(Application::new("slow").route(route));

    // One worker draining at 10ms per job cannot keep up with a burst of
    // six, so the queue depth crosses the bound while these are submitted.
    let mut pending = Vec::new();
    for n in 0..6 {
        let (writer, shared) = BufferedWriter::new();
        dispatcher.handle(
            RawRequest::new(Method::GET, format!("/slow/{n}")),
            Box::new(writer),
        );
        pending.push((n, shared));
    }
    for (n, shared) in pending {
        let rec = shared.wait_finished(WAIT).expect("queued request never finished");
        assert_eq!(rec.status, 200);
        assert_eq!(rec.body_text(), format!("ok {n}"));
    }
}

#[test]
fn pool_unavailable_renders_503_through_the_error_policy() {
    struct StampingHandler;
    impl ErrorHandler for StampingHandler {
        fn apply(&self, ctx: &mut Context, err: &HandlerError) {
            ctx.set_header("X-Handled-By", "stamping");
            DefaultErrorHandler.apply(ctx, err);
        }
    }

    common::setup();
    let route = Route::new(Method::GET, "/work", |ctx: &mut Context| {
        ctx.send_text("unreachable");
        HandlerResult::Done
    })
    .unwrap()
    .with_execution(ExecutionMode::Worker);
    // Zero workers leaves nothing holding the queue's receive side, so
    // every submission bounces back to the controller.
    let config = RuntimeConfig {
        stack_size: 0x8000,
        workers: 0,
        queue_bound: 4,
    };
    let mut dispatcher = MultiAppDispatcher::new(config);
    dispatcher.mount(
        Application::new("idle")
            .with_error_handler(StampingHandler)
            .route(route),
    );

    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/work"), Box::new(writer));
    let rec = shared.snapshot();
    assert_eq!(rec.status, 503);
    assert_eq!(rec.header("X-Handled-By"), Some("stamping"));
    assert!(rec.body_text().contains("service unavailable"));
    assert!(rec.finished);
}

#[test]
fn panicking_handler_becomes_500() {
    common::setup();
    let route = Route::new(Method::GET, "/boom", |_: &mut Context| -> HandlerResult {
        panic!("kaput");
    })
    .unwrap();
    let dispatcher = dispatcher_with(route);

    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/boom"), Box::new(writer));
    let rec = shared.snapshot();
    assert_eq!(rec.status, 500);
    assert!(rec.finished);
    assert!(rec.body_text().contains("kaput"));
}

#[test]
fn panicking_worker_handler_becomes_500_and_pool_survives() {
    common::setup();
    let route = Route::new(Method::GET, "/boom", |_: &mut Context| -> HandlerResult {
        panic!("worker kaput");
    })
    .unwrap()
    .with_execution(ExecutionMode::Worker);
    let dispatcher = dispatcher_with(route);

    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/boom"), Box::new(writer));
    let rec = shared.wait_finished(WAIT).expect("panic response never finished");
    assert_eq!(rec.status, 500);

    // The pool is still alive for the next request.
    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/boom"), Box::new(writer));
    assert!(shared.wait_finished(WAIT).is_some());
}

#[test]
fn deferred_response_resumes_the_request() {
    common::setup();
    let route = Route::new(Method::GET, "/later", |_: &mut Context| {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let _ = tx.send(ResponsePayload::new(200, json!("eventually")));
        });
        HandlerResult::Deferred(rx)
    })
    .unwrap()
    .with_execution(ExecutionMode::Worker);
    let dispatcher = dispatcher_with(route);

    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/later"), Box::new(writer));
    let rec = shared.wait_finished(WAIT).expect("deferred response never arrived");
    assert_eq!(rec.status, 200);
    assert_eq!(rec.body_text(), "\"eventually\"");
}

#[test]
fn dropped_deferred_sender_fails_the_request() {
    common::setup();
    let route = Route::new(Method::GET, "/ghost", |_: &mut Context| {
        let (tx, rx) = mpsc::channel::<ResponsePayload>();
        drop(tx);
        HandlerResult::Deferred(rx)
    })
    .unwrap();
    let dispatcher = dispatcher_with(route);

    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/ghost"), Box::new(writer));
    let rec = shared.snapshot();
    assert_eq!(rec.status, 500);
    assert!(rec.body_text().contains("dropped without completing"));
}

#[test]
fn concurrent_detached_requests_stay_isolated() {
    common::setup();
    let pending: Arc<Mutex<Vec<(String, mpsc::Sender<ResponsePayload>)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::clone(&pending);
    let route = Route::new(Method::GET, "/slot/{tag}", move |ctx: &mut Context| {
        let tag = ctx.path_param("tag").unwrap_or("?").to_string();
        let (tx, rx) = mpsc::channel();
        registry.lock().unwrap().push((tag, tx));
        HandlerResult::Deferred(rx)
    })
    .unwrap()
    .with_execution(ExecutionMode::Worker);
    let dispatcher = dispatcher_with(route);

    let (writer_a, shared_a) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/slot/a"), Box::new(writer_a));
    let (writer_b, shared_b) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/slot/b"), Box::new(writer_b));

    // Wait for both handlers to detach.
    let deadline = std::time::Instant::now() + WAIT;
    loop {
        if pending.lock().unwrap().len() == 2 {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "handlers never detached");
        std::thread::sleep(Duration::from_millis(5));
    }

    // Complete them out of order; each response lands on its own writer
    // with no mixing of bytes.
    let senders = {
        let mut guard = pending.lock().unwrap();
        std::mem::take(&mut *guard)
    };
    for (tag, tx) in senders.iter().rev() {
        tx.send(ResponsePayload::new(200, json!(format!("for {tag}")))).unwrap();
    }

    let rec_a = shared_a.wait_finished(WAIT).expect("request a never finished");
    let rec_b = shared_b.wait_finished(WAIT).expect("request b never finished");
    assert_eq!(rec_a.body_text(), "\"for a\"");
    assert_eq!(rec_b.body_text(), "\"for b\"");
}
