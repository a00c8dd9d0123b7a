// 该文件是 Dockline （码头计数） 项目的一部分。
// tests/control_test.rs - 控制接口测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod common;

use std::path::{Path, PathBuf};

use common::{FakePipeline, test_config, wait_finished, wait_until};
use dockline::{
  SessionController,
  control::{ControlPlane, StartRequest, StopRequest},
  store::{JsonLedger, JsonStreamTable, JsonlVisitLog, ProcessedLedger, StoreError, StreamResolver},
};
use serde_json::Value;

struct BrokenResolver;

impl StreamResolver for BrokenResolver {
  fn resolve(&self, _camera_id: &str) -> Result<String, StoreError> {
    Err(StoreError::Malformed("database unavailable".to_string()))
  }
}

fn plane_with(
  pipeline: FakePipeline,
  resolver: Box<dyn StreamResolver>,
  dir: &Path,
) -> ControlPlane<FakePipeline> {
  ControlPlane::new(
    SessionController::new(pipeline, test_config()),
    resolver,
    Box::new(JsonlVisitLog::new(dir.join("visits.jsonl"))),
    Box::new(JsonLedger::new(dir.join("processed.json"))),
  )
}

fn table() -> Box<JsonStreamTable> {
  let mut table = JsonStreamTable::default();
  table.insert("117", "fake://camera/117");
  Box::new(table)
}

fn start_request(camera: Option<&str>, visit: Option<&str>) -> StartRequest {
  StartRequest {
    trigger: 1,
    camera_id: camera.map(String::from),
    visit_id: visit.map(String::from),
  }
}

fn visit_rows(dir: &Path) -> Vec<Value> {
  std::fs::read_to_string(dir.join("visits.jsonl"))
    .unwrap_or_default()
    .lines()
    .map(|l| serde_json::from_str(l).unwrap())
    .collect()
}

#[test]
fn zero_trigger_is_a_no_op() {
  let dir = tempfile::tempdir().unwrap();
  let plane = plane_with(FakePipeline::default(), table(), dir.path());

  let response = plane.start(&StartRequest {
    trigger: 0,
    camera_id: Some("117".to_string()),
    visit_id: Some("TV-1".to_string()),
  });
  assert_eq!(response.code, 200);
  assert_eq!(response.status(), "stopped");
  assert_eq!(response.body["message"], "Processing not triggered.");
  assert!(!plane.controller().is_running());
}

#[test]
fn start_validates_request() {
  let dir = tempfile::tempdir().unwrap();
  let plane = plane_with(FakePipeline::default(), table(), dir.path());

  assert_eq!(plane.start(&start_request(Some("117"), None)).code, 400);
  assert_eq!(plane.start(&start_request(None, Some("TV-1"))).code, 400);
  assert_eq!(plane.start(&start_request(Some(" "), Some("TV-1"))).code, 400);

  let unknown = plane.start(&start_request(Some("999"), Some("TV-1")));
  assert_eq!(unknown.code, 404);
  assert!(unknown.body["message"].as_str().unwrap().contains("999"));
}

#[test]
fn resolver_failure_is_server_error() {
  let dir = tempfile::tempdir().unwrap();
  let plane = plane_with(FakePipeline::default(), Box::new(BrokenResolver), dir.path());
  let response = plane.start(&start_request(Some("117"), Some("TV-1")));
  assert_eq!(response.code, 500);
  assert_eq!(response.status(), "error");
}

#[test]
fn second_start_conflicts() {
  let dir = tempfile::tempdir().unwrap();
  let plane = plane_with(FakePipeline::default(), table(), dir.path());

  let first = plane.start(&start_request(Some("117"), Some("TV-1")));
  assert_eq!(first.code, 200);
  assert_eq!(first.status(), "started");

  let second = plane.start(&start_request(Some("117"), Some("TV-2")));
  assert_eq!(second.code, 409);
  assert_eq!(plane.controller().status().visit_id.as_deref(), Some("TV-1"));

  let stopped = plane.stop(&StopRequest::default());
  assert_eq!(stopped.code, 200);
}

#[test]
fn stop_without_session() {
  let dir = tempfile::tempdir().unwrap();
  let plane = plane_with(FakePipeline::default(), table(), dir.path());
  let response = plane.stop(&StopRequest {
    visit_id: Some("TV-1".to_string()),
  });
  assert_eq!(response.code, 200);
  assert_eq!(response.body["message"], "No running session.");
  assert!(visit_rows(dir.path()).is_empty());
}

#[test]
fn stop_persists_result_once() {
  let dir = tempfile::tempdir().unwrap();
  let pipeline = FakePipeline {
    frames: Some(4),
    ..Default::default()
  };
  let plane = plane_with(pipeline, table(), dir.path());

  assert_eq!(plane.start(&start_request(Some("117"), Some("TV-7"))).code, 200);
  wait_finished(plane.controller());

  let response = plane.stop(&StopRequest {
    visit_id: Some("TV-7".to_string()),
  });
  assert_eq!(response.code, 200);
  assert_eq!(response.status(), "completed");
  assert_eq!(response.body["object_count"], 1);
  assert_eq!(response.body["output_path"], "mem://overlays");

  // 重复 stop 不会重复保存
  let again = plane.stop(&StopRequest {
    visit_id: Some("TV-7".to_string()),
  });
  assert_eq!(again.body["object_count"], 1);

  let rows = visit_rows(dir.path());
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0]["visit_id"], "TV-7");
  assert_eq!(rows[0]["object_count"], 1);
  assert_eq!(rows[0]["output_path"], "mem://overlays");
}

#[test]
fn stop_marks_recorded_segments_processed() {
  let dir = tempfile::tempdir().unwrap();
  let plane = plane_with(FakePipeline::default(), table(), dir.path());

  plane.start(&start_request(Some("117"), Some("TV-8")));
  wait_until(plane.controller(), |s| !s.recorded_paths.is_empty());

  let response = plane.stop(&StopRequest::default());
  let paths: Vec<PathBuf> = response.body["recorded_paths"]
    .as_array()
    .unwrap()
    .iter()
    .map(|v| PathBuf::from(v.as_str().unwrap()))
    .collect();
  assert!(!paths.is_empty());
  assert_eq!(response.body["visit_id"], "TV-8");

  let ledger = JsonLedger::new(dir.path().join("processed.json"));
  for path in paths.iter() {
    assert!(ledger.is_processed(path).unwrap());
  }
}
