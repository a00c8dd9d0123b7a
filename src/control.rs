// 该文件是 Dockline （码头计数） 项目的一部分。
// src/control.rs - 会话控制接口
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

//! 与传输无关的启动/停止接口，返回状态码和 JSON 正文，由外层服务挂到 HTTP 上。

use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::{
  session::{Session, SessionController, SessionError, SessionPipeline, SessionStatus},
  store::{PersistenceSink, ProcessedLedger, StoreError, StreamResolver, VisitRecord},
};

#[derive(Debug, Clone, Default)]
pub struct StartRequest {
  pub trigger: i64,
  pub camera_id: Option<String>,
  pub visit_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StopRequest {
  pub visit_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlResponse {
  pub code: u16,
  pub body: Value,
}

impl ControlResponse {
  fn new(code: u16, status: &str, message: impl Into<String>) -> Self {
    Self {
      code,
      body: json!({ "status": status, "message": message.into() }),
    }
  }

  fn with(mut self, key: &str, value: Value) -> Self {
    if let Some(object) = self.body.as_object_mut() {
      object.insert(key.to_string(), value);
    }
    self
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.code)
  }

  pub fn status(&self) -> &str {
    self.body["status"].as_str().unwrap_or_default()
  }
}

pub struct ControlPlane<P: SessionPipeline> {
  controller: SessionController<P>,
  resolver: Box<dyn StreamResolver>,
  sink: Box<dyn PersistenceSink>,
  ledger: Box<dyn ProcessedLedger>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl<P: SessionPipeline> ControlPlane<P> {
  pub fn new(
    controller: SessionController<P>,
    resolver: Box<dyn StreamResolver>,
    sink: Box<dyn PersistenceSink>,
    ledger: Box<dyn ProcessedLedger>,
  ) -> Self {
    Self {
      controller,
      resolver,
      sink,
      ledger,
    }
  }

  pub fn controller(&self) -> &SessionController<P> {
    &self.controller
  }

  pub fn start(&self, request: &StartRequest) -> ControlResponse {
    if request.trigger == 0 {
      return ControlResponse::new(200, SessionStatus::Stopped.as_str(), "Processing not triggered.");
    }

    let (Some(camera_id), Some(visit_id)) = (non_empty(&request.camera_id), non_empty(&request.visit_id))
    else {
      return ControlResponse::new(400, "error", "camera_id and visit_id are required.");
    };

    let address = match self.resolver.resolve(camera_id) {
      Ok(address) => address,
      Err(StoreError::NotFound(_)) => {
        warn!("[{}] 没有找到流地址", camera_id);
        return ControlResponse::new(404, "error", format!("Camera {} not found.", camera_id));
      }
      Err(e) => {
        error!("[{}] 查询流地址失败: {}", camera_id, e);
        return ControlResponse::new(500, "error", e.to_string());
      }
    };

    match self.controller.start(camera_id, Some(visit_id), &address) {
      Ok(session) => ControlResponse::new(200, "started", format!("Processing started for camera {}.", camera_id))
        .with("camera_id", json!(camera_id))
        .with("visit_id", json!(visit_id))
        .with("output_path", json!(session.output_ref)),
      Err(SessionError::Conflict(_)) => {
        let current = self.controller.status();
        ControlResponse::new(409, "error", "A session is already running.")
          .with("camera_id", json!(current.camera_id))
          .with("object_count", json!(current.count))
      }
      Err(e) => ControlResponse::new(500, "error", e.to_string()),
    }
  }

  pub fn stop(&self, request: &StopRequest) -> ControlResponse {
    if self.controller.status().status == SessionStatus::Idle {
      return ControlResponse::new(200, "idle", "No running session.");
    }

    let session = self.controller.stop();
    let visit_id = non_empty(&request.visit_id)
      .map(String::from)
      .or_else(|| session.visit_id.clone());
    self.persist(&session, visit_id.as_deref());
    self.mark_recorded(&session);

    let message = session
      .message
      .clone()
      .unwrap_or_else(|| "Processing stopped.".to_string());
    let mut response = ControlResponse::new(200, session.status.as_str(), message);
    for (key, value) in session.to_json().as_object().into_iter().flatten() {
      if key != "status" && key != "message" {
        response = response.with(key, value.clone());
      }
    }
    response.with("visit_id", json!(visit_id))
  }

  fn persist(&self, session: &Session, visit_id: Option<&str>) {
    let (Some(visit_id), Some(output_ref)) = (visit_id, session.output_ref.as_deref()) else {
      info!("会话没有 visit id 或输出位置，跳过保存");
      return;
    };
    let record = VisitRecord::new(visit_id, output_ref, session.count);
    if let Err(e) = self.sink.save(&record) {
      error!("保存 visit {} 失败: {}", visit_id, e);
    }
  }

  fn mark_recorded(&self, session: &Session) {
    for path in session.recorded_paths.iter() {
      if let Err(e) = self.ledger.mark_processed(path) {
        error!("标记分段 {} 失败: {}", path.display(), e);
      }
    }
  }
}
