//! Behaviour-driven tests for line framing.

use std::str::FromStr;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};

use crate::{Frame, LineFramer, Message};

/// A quoted value from a feature file.
#[derive(Debug, Clone)]
struct Quoted(String);

impl FromStr for Quoted {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim_matches('"').to_owned()))
    }
}

/// Raw bytes for a named chunk used by the scenarios.
fn chunk_bytes(name: &str) -> &'static [u8] {
    match name {
        "split head" => b"{\"id\":\"a\",\"result\":1}\n{\"id\":\"b\"".as_slice(),
        "split tail" => b",\"result\":2}\n".as_slice(),
        "garbage line" => b"this is not json\n".as_slice(),
        "progress notification" => b"{\"method\":\"task_progress\",\"params\":{}}\n".as_slice(),
        "blank lines" => b"\n   \n\r\n\n".as_slice(),
        "bare response" => b"{\"id\":\"c\"}\n\n".as_slice(),
        other => panic!("unknown chunk: {other}"),
    }
}

#[derive(Default)]
struct TestWorld {
    framer: LineFramer,
    frames: Vec<Frame>,
}

#[fixture]
fn world() -> TestWorld {
    TestWorld::default()
}

fn payload(frame: &Frame) -> Value {
    match frame {
        Ok(Message::Response(response)) => json!({ "id": response.id() }),
        Ok(Message::Notification(notification)) => json!({ "method": notification.method_name() }),
        Ok(Message::Request(request)) => json!({ "request": request.id() }),
        Err(err) => panic!("unexpected malformed frame: {err}"),
    }
}

#[given("an empty framer")]
fn given_empty_framer(world: &mut TestWorld) {
    world.framer = LineFramer::new();
    world.frames.clear();
}

#[when("the chunk {chunk} arrives")]
fn when_chunk_arrives(world: &mut TestWorld, chunk: Quoted) {
    let frames: Vec<Frame> = world.framer.push(chunk_bytes(&chunk.0)).collect();
    world.frames.extend(frames);
}

#[then("{count} frames have been decoded")]
fn then_frame_count(world: &mut TestWorld, count: usize) {
    assert_eq!(world.frames.len(), count, "frames: {:?}", world.frames);
}

#[then("frame {index} is the response {id}")]
fn then_frame_is_response(world: &mut TestWorld, index: usize, id: Quoted) {
    let frame = world.frames.get(index).expect("frame index in range");
    assert_eq!(payload(frame), json!({ "id": id.0 }));
}

#[then("frame {index} is the notification {method}")]
fn then_frame_is_notification(world: &mut TestWorld, index: usize, method: Quoted) {
    let frame = world.frames.get(index).expect("frame index in range");
    assert_eq!(payload(frame), json!({ "method": method.0 }));
}

#[then("frame {index} is a malformed message")]
fn then_frame_is_malformed(world: &mut TestWorld, index: usize) {
    let frame = world.frames.get(index).expect("frame index in range");
    let error = frame.as_ref().expect_err("frame should be malformed");
    assert!(error.is_malformed());
}

#[then("nothing is buffered")]
fn then_nothing_buffered(world: &mut TestWorld) {
    assert_eq!(world.framer.buffered_len(), 0);
}

#[scenario(path = "tests/features/framing.feature")]
fn framing_behaviour(world: TestWorld) {
    let _ = world;
}
