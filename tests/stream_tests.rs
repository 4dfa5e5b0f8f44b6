mod common;

use http::Method;
use manifold::app::{Application, MultiAppDispatcher};
use manifold::context::{BufferedWriter, Context};
use manifold::dispatch::HandlerResult;
use manifold::error::HandlerError;
use manifold::router::Route;
use manifold::runtime_config::RuntimeConfig;
use manifold::server::{HttpHandler, RawRequest};
use manifold::stream::{pump, StreamEvent, Subscriber};
use may::sync::mpsc;
use serde_json::{json, Value};

fn stream_dispatcher(events: Vec<StreamEvent>) -> MultiAppDispatcher {
    let events = std::sync::Mutex::new(Some(events));
    let route = Route::new(Method::GET, "/stream", move |_: &mut Context| {
        let (tx, rx) = mpsc::channel();
        if let Some(events) = events.lock().unwrap().take() {
            for event in events {
                let _ = tx.send(event);
            }
        }
        HandlerResult::Stream(rx)
    })
    .unwrap();
    let mut dispatcher = MultiAppDispatcher::new(RuntimeConfig::default());
    dispatcher.mount(Application::new("streams").route(route));
    dispatcher
}

#[test]
fn values_stream_into_the_body_in_order() {
    common::setup();
    let dispatcher = stream_dispatcher(vec![
        StreamEvent::Next(json!({"n": 1})),
        StreamEvent::Next(json!({"n": 2})),
        StreamEvent::Next(json!({"n": 3})),
        StreamEvent::Complete,
    ]);
    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/stream"), Box::new(writer));
    let rec = shared.snapshot();
    assert_eq!(rec.status, 200);
    assert_eq!(rec.body_text(), "{\"n\":1}{\"n\":2}{\"n\":3}");
    assert!(rec.finished);
}

#[test]
fn error_midstream_terminates_and_later_values_are_ignored() {
    common::setup();
    let dispatcher = stream_dispatcher(vec![
        StreamEvent::Next(json!("a")),
        StreamEvent::Next(json!("b")),
        StreamEvent::Error(HandlerError::Stream {
            message: "producer failed".to_string(),
        }),
        StreamEvent::Next(json!("after-error")),
        StreamEvent::Error(HandlerError::failure("second error")),
        StreamEvent::Complete,
    ]);
    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/stream"), Box::new(writer));
    let rec = shared.snapshot();
    // The head was already flushed by the first value, so the error can only
    // terminate the stream; the status stays 200 and nothing after the error
    // reaches the body.
    assert_eq!(rec.status, 200);
    assert_eq!(rec.body_text(), "\"a\"\"b\"");
    assert!(rec.finished);
}

#[test]
fn error_before_any_value_uses_the_error_policy() {
    common::setup();
    let dispatcher = stream_dispatcher(vec![StreamEvent::Error(HandlerError::Stream {
        message: "no values".to_string(),
    })]);
    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/stream"), Box::new(writer));
    let rec = shared.snapshot();
    assert_eq!(rec.status, 500);
    assert!(rec.body_text().contains("no values"));
}

#[test]
fn completion_writes_nothing_and_end_closes_the_exchange() {
    common::setup();
    let dispatcher = stream_dispatcher(vec![StreamEvent::Complete]);
    let (writer, shared) = BufferedWriter::new();
    dispatcher.handle(RawRequest::new(Method::GET, "/stream"), Box::new(writer));
    let rec = shared.snapshot();
    // An empty stream still produces a well-formed empty 200, finalized by
    // the controller, not by the producer.
    assert_eq!(rec.status, 200);
    assert!(rec.body.is_empty());
    assert!(rec.finished);
}

#[derive(Default)]
struct CountingSubscriber {
    values: Vec<Value>,
    errors: usize,
    completions: usize,
}

impl Subscriber for CountingSubscriber {
    fn on_next(&mut self, value: Value) {
        self.values.push(value);
    }
    fn on_error(&mut self, _err: HandlerError) {
        self.errors += 1;
    }
    fn on_complete(&mut self) {
        self.completions += 1;
    }
}

#[test]
fn pump_treats_a_dropped_producer_as_completion() {
    common::setup();
    let (tx, rx) = mpsc::channel();
    tx.send(StreamEvent::Next(json!(1))).unwrap();
    tx.send(StreamEvent::Next(json!(2))).unwrap();
    drop(tx);
    let mut sub = CountingSubscriber::default();
    pump(&mut sub, &rx);
    assert_eq!(sub.values.len(), 2);
    assert_eq!(sub.errors, 0);
    assert_eq!(sub.completions, 1);
}
