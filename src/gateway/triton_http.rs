// 该文件是 Shanan Sink （山南西风·图像汇） 项目的一部分。
// src/gateway/triton_http.rs - Triton / KServe v2 HTTP 推理客户端
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

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::{GatewayError, InferenceGateway, InferenceStats};
use crate::{FromUrl, frame::NormalizedTensor, model::RawDetectionTensor};

const DEFAULT_INPUT_NAME: &str = "input";
const DEFAULT_OUTPUT_NAME: &str = "output";
const REQUEST_ID: &str = "0";
const FP32: &str = "FP32";

#[derive(Serialize)]
struct InferRequest<'a> {
  id: &'a str,
  inputs: [InputTensor<'a>; 1],
  outputs: [RequestedOutput<'a>; 1],
}

#[derive(Serialize)]
struct InputTensor<'a> {
  name: &'a str,
  shape: [usize; 4],
  datatype: &'a str,
  data: &'a [f32],
}

#[derive(Serialize)]
struct RequestedOutput<'a> {
  name: &'a str,
}

#[derive(Deserialize)]
struct InferResponse {
  #[serde(default)]
  outputs: Vec<OutputTensor>,
}

#[derive(Deserialize)]
struct OutputTensor {
  name: String,
  shape: Vec<usize>,
  #[serde(default)]
  datatype: String,
  data: Vec<f32>,
}

pub struct TritonHttpGatewayBuilder {
  base: Url,
  input_name: String,
  output_name: String,
  timeout: Option<Duration>,
}

impl FromUrl for TritonHttpGatewayBuilder {
  type Error = GatewayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !matches!(url.scheme(), "http" | "https") {
      return Err(GatewayError::InvalidEndpoint(format!(
        "期望 http 或 https 方案, 实际为 '{}'",
        url.scheme()
      )));
    }
    if url.cannot_be_a_base() {
      return Err(GatewayError::InvalidEndpoint(url.to_string()));
    }

    Ok(Self {
      base: url.clone(),
      input_name: DEFAULT_INPUT_NAME.to_string(),
      output_name: DEFAULT_OUTPUT_NAME.to_string(),
      timeout: None,
    })
  }
}

impl TritonHttpGatewayBuilder {
  pub fn input_name(mut self, name: impl Into<String>) -> Self {
    self.input_name = name.into();
    self
  }

  pub fn output_name(mut self, name: impl Into<String>) -> Self {
    self.output_name = name.into();
    self
  }

  /// `None` 表示不设超时
  pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn build(self) -> Result<TritonHttpGateway, GatewayError> {
    let client = Client::builder()
      .timeout(self.timeout)
      .build()
      .map_err(|e| GatewayError::InvalidEndpoint(e.to_string()))?;
    info!(
      "推理后端: {} (超时: {:?})",
      self.base, self.timeout
    );

    Ok(TritonHttpGateway {
      client,
      base: self.base,
      input_name: self.input_name,
      output_name: self.output_name,
    })
  }
}

pub struct TritonHttpGateway {
  client: Client,
  base: Url,
  input_name: String,
  output_name: String,
}

impl TritonHttpGateway {
  fn model_url(&self, model_name: &str, action: &str) -> Result<Url, GatewayError> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| GatewayError::InvalidEndpoint(self.base.to_string()))?
      .pop_if_empty()
      .extend(["v2", "models", model_name, action]);
    Ok(url)
  }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
  if e.is_connect() || e.is_timeout() || e.is_request() {
    GatewayError::BackendUnavailable(e.to_string())
  } else {
    GatewayError::BackendProtocol(e.to_string())
  }
}

fn check_status(response: Response) -> Result<Response, GatewayError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().unwrap_or_default();
  let message = format!("HTTP {}: {}", status, body.trim());
  match status {
    StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
      Err(GatewayError::BackendUnavailable(message))
    }
    _ => Err(GatewayError::BackendProtocol(message)),
  }
}

impl InferenceGateway for TritonHttpGateway {
  fn infer(
    &self,
    model_name: &str,
    tensor: &NormalizedTensor,
  ) -> Result<RawDetectionTensor, GatewayError> {
    let url = self.model_url(model_name, "infer")?;
    let request = InferRequest {
      id: REQUEST_ID,
      inputs: [InputTensor {
        name: &self.input_name,
        shape: tensor.shape(),
        datatype: FP32,
        data: tensor.as_slice(),
      }],
      outputs: [RequestedOutput {
        name: &self.output_name,
      }],
    };

    debug!("POST {}", url);
    let response = self
      .client
      .post(url)
      .json(&request)
      .send()
      .map_err(transport_error)?;
    let response: InferResponse = check_status(response)?
      .json()
      .map_err(|e| GatewayError::BackendProtocol(format!("无法解析推理响应: {}", e)))?;

    let output = response
      .outputs
      .into_iter()
      .find(|o| o.name == self.output_name)
      .ok_or_else(|| {
        GatewayError::BackendProtocol(format!("响应中缺少输出张量 '{}'", self.output_name))
      })?;
    if !output.datatype.is_empty() && output.datatype != FP32 {
      return Err(GatewayError::BackendProtocol(format!(
        "输出张量类型为 {}, 期望 {}",
        output.datatype, FP32
      )));
    }
    debug!("输出张量形状: {:?}", output.shape);

    RawDetectionTensor::new(output.shape, output.data)
      .map_err(|e| GatewayError::BackendProtocol(e.to_string()))
  }

  fn get_stats(&self, model_name: &str) -> Result<InferenceStats, GatewayError> {
    let url = self.model_url(model_name, "stats")?;
    debug!("GET {}", url);
    let response = self.client.get(url).send().map_err(transport_error)?;
    let raw: serde_json::Value = check_status(response)?
      .json()
      .map_err(|e| GatewayError::BackendProtocol(format!("无法解析统计响应: {}", e)))?;

    let model_entries = raw
      .get("model_stats")
      .and_then(serde_json::Value::as_array)
      .map_or(0, Vec::len);
    Ok(InferenceStats { model_entries, raw })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gateway(base: &str) -> TritonHttpGateway {
    TritonHttpGatewayBuilder::from_url(&Url::parse(base).unwrap())
      .unwrap()
      .build()
      .unwrap()
  }

  #[test]
  fn model_urls_follow_v2_layout() {
    let g = gateway("http://localhost:8000");
    assert_eq!(
      g.model_url("gtc_onnx", "infer").unwrap().as_str(),
      "http://localhost:8000/v2/models/gtc_onnx/infer"
    );

    let g = gateway("http://triton.local:8000/proxy/");
    assert_eq!(
      g.model_url("m", "stats").unwrap().as_str(),
      "http://triton.local:8000/proxy/v2/models/m/stats"
    );
  }

  #[test]
  fn non_http_scheme_is_rejected() {
    let url = Url::parse("grpc://localhost:8001").unwrap();
    assert!(matches!(
      TritonHttpGatewayBuilder::from_url(&url),
      Err(GatewayError::InvalidEndpoint(_))
    ));
  }

  #[test]
  fn request_serializes_as_v2_json() {
    let data = [0.0f32, 0.5];
    let request = InferRequest {
      id: REQUEST_ID,
      inputs: [InputTensor {
        name: "input",
        shape: [1, 3, 640, 640],
        datatype: FP32,
        data: &data,
      }],
      outputs: [RequestedOutput { name: "output" }],
    };
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["inputs"][0]["datatype"], "FP32");
    assert_eq!(value["inputs"][0]["shape"][1], 3);
    assert_eq!(value["outputs"][0]["name"], "output");
  }

  #[test]
  fn unreachable_backend_is_unavailable() {
    // 端口 9 (discard) 通常无人监听
    let g = gateway("http://127.0.0.1:9");
    assert!(matches!(
      g.get_stats("m"),
      Err(GatewayError::BackendUnavailable(_))
    ));
  }
}
