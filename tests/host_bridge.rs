//! Host bridge over in-memory pipes: JSON commands in, responses and
//! `cycle.finished` events out.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{event, fixture};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use taskpaper::SchedulerHandle;
use taskpaper::host::{HostCommandRouter, run_bridge};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio_util::sync::CancellationToken;

struct Host {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
}

impl Host {
    async fn send(&mut self, command: Value) {
        let mut line = serde_json::to_vec(&command).unwrap();
        line.push(b'\n');
        self.input.write_all(&line).await.unwrap();
    }

    async fn send_raw(&mut self, raw: &str) {
        self.input.write_all(raw.as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    /// Read lines until one matches `done`; returns every line read.
    async fn read_until(&mut self, done: impl Fn(&Value) -> bool) -> Vec<Value> {
        let mut seen = Vec::new();
        loop {
            let line = tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
                .await
                .expect("bridge went quiet")
                .unwrap()
                .expect("bridge closed its output");
            let value: Value = serde_json::from_str(&line).unwrap();
            let matched = done(&value);
            seen.push(value);
            if matched {
                return seen;
            }
        }
    }

    async fn response(&mut self, request_id: &str) -> Value {
        let lines = self.read_until(|v| v["request_id"] == request_id).await;
        lines.into_iter().last().unwrap()
    }
}

fn command(request_id: &str, name: &str) -> Value {
    json!({"v": 1, "request_id": request_id, "command": name})
}

fn start(
    controller: Arc<taskpaper::RefreshController>,
) -> (
    Host,
    CancellationToken,
    tokio::task::JoinHandle<taskpaper::Result<()>>,
) {
    let (host_in, bridge_in) = tokio::io::duplex(4096);
    let (bridge_out, host_out) = tokio::io::duplex(64 * 1024);
    let shutdown = CancellationToken::new();
    let events = controller.subscribe();
    let router = HostCommandRouter::new(SchedulerHandle::new(controller), shutdown.clone());
    let task = tokio::spawn(run_bridge(
        bridge_in,
        bridge_out,
        router,
        events,
        shutdown.clone(),
    ));
    (
        Host {
            input: host_in,
            output: BufReader::new(host_out).lines(),
        },
        shutdown,
        task,
    )
}

#[tokio::test]
async fn ping_refresh_and_stop() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path(), 3, vec![event("Board prep")]);
    let (mut host, shutdown, task) = start(Arc::clone(&f.controller));

    host.send(command("p1", "host.ping")).await;
    let pong = host.response("p1").await;
    assert_eq!(pong["ok"], true);
    assert_eq!(pong["payload"]["pong"], true);
    assert_eq!(pong["v"], 1);

    host.send(command("r1", "refresh.now")).await;
    let mut lines = host.read_until(|v| v["request_id"] == "r1").await;
    if !lines.iter().any(|v| v["event"] == "cycle.finished") {
        lines.extend(host.read_until(|v| v["event"] == "cycle.finished").await);
    }
    let response = lines.iter().find(|v| v["request_id"] == "r1").unwrap();
    assert_eq!(response["payload"]["status"], "succeeded");
    assert_eq!(response["payload"]["cycle"]["tasks"][0], "Prepare: Board prep");
    let finished = lines.iter().find(|v| v["event"] == "cycle.finished").unwrap();
    assert_eq!(finished["payload"]["seq"], 1);
    assert!(finished["event_id"].as_str().is_some_and(|id| !id.is_empty()));

    host.send(command("s1", "refresh.status")).await;
    let status = host.response("s1").await;
    assert_eq!(status["payload"]["consecutive_failures"], 0);
    assert!(status["payload"]["current_artifact"].is_string());

    host.send(command("x1", "runtime.stop")).await;
    let stop = host.response("x1").await;
    assert_eq!(stop["payload"]["stopping"], true);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("bridge stops after runtime.stop")
        .unwrap()
        .unwrap();
    assert!(shutdown.is_cancelled());
}

#[tokio::test]
async fn bad_lines_get_parse_errors_and_the_bridge_keeps_going() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path(), 3, Vec::new());
    let (mut host, _shutdown, task) = start(Arc::clone(&f.controller));

    host.send_raw("{not json").await;
    let error = host.response("parse-error").await;
    assert_eq!(error["ok"], false);

    host.send(command("u1", "orb.flash")).await;
    let unknown = host.response("parse-error").await;
    assert!(unknown["error"].as_str().unwrap().contains("parse"));

    host.send(json!({"v": 7, "request_id": "v7", "command": "host.ping"}))
        .await;
    let wrong_version = host.response("v7").await;
    assert_eq!(wrong_version["ok"], false);

    host.send(command("pz", "refresh.pause")).await;
    let paused = host.response("pz").await;
    assert_eq!(paused["payload"]["paused"], true);
    assert!(f.controller.get_status().paused);

    drop(host);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("bridge stops at end of input")
        .unwrap()
        .unwrap();
}
