// 该文件是 Tumorscope 项目的一部分。
// src/model/yolo.rs - 基于 ONNX Runtime 的 YOLO 检测模型
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Tumorscope Contributors

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  sync::Mutex,
  time::Instant,
};

use image::{RgbImage, imageops::FilterType};
use ort::{session::Session, value::Tensor};
use tracing::{debug, error, info, warn};

use crate::{
  config::DetectorConfig,
  error::ModelLoadError,
  model::{DetectItem, DetectResult, Model, ModelError},
};

const YOLO_NUM_INPUTS: usize = 1;
const YOLO_BOX_ATTRS: usize = 4;
const YOLO_RGB_CHANNELS: usize = 3;
const YOLO_MAX_DETECTIONS: usize = 300;
const YOLO_NAMES_KEY: &str = "names";
const YOLO_PAD_VALUE: f32 = 114.0 / 255.0;
const TRAINED_CLASS_COUNT: usize = 2;

/// YOLOv8 系列导出的 ONNX 检测模型。
///
/// ONNX Runtime 会话运行时需要可变借用，因此推理通过互斥锁串行执行。
pub struct Yolo {
  session: Mutex<Session>,
  labels: BTreeMap<u32, String>,
  config: DetectorConfig,
}

pub struct YoloBuilder {
  model_path: PathBuf,
  config: DetectorConfig,
}

impl YoloBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    YoloBuilder {
      model_path: model_path.as_ref().to_path_buf(),
      config: DetectorConfig::default(),
    }
  }

  pub fn config(mut self, config: DetectorConfig) -> Self {
    self.config = config;
    self
  }

  pub fn build(self) -> Result<Yolo, ModelLoadError> {
    info!("加载模型文件: {}", self.model_path.display());

    let session = Session::builder()
      .and_then(|b| b.commit_from_file(&self.model_path))
      .map_err(|e| ModelLoadError::invalid(&self.model_path, e))?;

    if session.inputs.len() != YOLO_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        YOLO_NUM_INPUTS,
        session.inputs.len()
      );
      return Err(ModelLoadError::invalid(
        &self.model_path,
        format!(
          "expected {} model input, found {}",
          YOLO_NUM_INPUTS,
          session.inputs.len()
        ),
      ));
    }

    if session.outputs.is_empty() {
      return Err(ModelLoadError::invalid(&self.model_path, "model has no outputs"));
    }

    let labels = read_labels(&session);
    let yolo = Yolo {
      session: Mutex::new(session),
      labels,
      config: self.config,
    };

    info!("模型类别: {:?}", yolo.labels());
    if let Some(message) = label_mismatch(yolo.labels(), yolo.config.positive_class) {
      warn!("{}", message);
    }

    Ok(yolo)
  }
}

/// 检查模型类别表与阳性类别配置是否匹配，不匹配时返回提示信息
fn label_mismatch(labels: &BTreeMap<u32, String>, positive_class: u32) -> Option<String> {
  if labels.is_empty() {
    return None;
  }

  if !labels.contains_key(&positive_class) {
    return Some(format!(
      "阳性类别索引 {} 不在模型类别表中 ({} 个类别)，检测结果将始终为阴性",
      positive_class,
      labels.len()
    ));
  }

  if labels.len() > TRAINED_CLASS_COUNT {
    return Some(format!(
      "模型有 {} 个类别，阳性类别 {} 对应 '{}'，请确认加载的是肿瘤检测模型",
      labels.len(),
      positive_class,
      labels[&positive_class]
    ));
  }

  None
}

fn read_labels(session: &Session) -> BTreeMap<u32, String> {
  let metadata = match session.metadata() {
    Ok(metadata) => metadata,
    Err(e) => {
      warn!("读取模型元数据失败: {}", e);
      return BTreeMap::new();
    }
  };

  match metadata.custom(YOLO_NAMES_KEY) {
    Ok(Some(names)) => parse_names(&names),
    _ => {
      warn!("模型元数据中没有类别名称，使用类别索引代替");
      BTreeMap::new()
    }
  }
}

/// 解析导出时写入的类别表，形如 `{0: 'negative', 1: 'positive'}`
fn parse_names(raw: &str) -> BTreeMap<u32, String> {
  raw
    .trim()
    .trim_start_matches('{')
    .trim_end_matches('}')
    .split(',')
    .filter_map(|entry| {
      let (id, name) = entry.split_once(':')?;
      let id = id.trim().parse().ok()?;
      let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
      Some((id, name.to_string()))
    })
    .collect()
}

fn label_for(labels: &BTreeMap<u32, String>, class_id: u32) -> String {
  labels
    .get(&class_id)
    .cloned()
    .unwrap_or_else(|| format!("class{}", class_id))
}

impl Yolo {
  pub fn labels(&self) -> &BTreeMap<u32, String> {
    &self.labels
  }
}

/// 等比缩放后居中放置的位置信息，用于把检测框映射回原图
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
}

/// 保持宽高比缩放到 `size`×`size`，空白处填充灰色，输出归一化的 NCHW 浮点张量
fn letterbox(image: &RgbImage, size: u32) -> (Vec<f32>, Letterbox) {
  let (orig_w, orig_h) = image.dimensions();
  let scale = (size as f32 / orig_w.max(1) as f32).min(size as f32 / orig_h.max(1) as f32);

  let new_w = ((orig_w as f32 * scale).round() as u32).clamp(1, size);
  let new_h = ((orig_h as f32 * scale).round() as u32).clamp(1, size);
  let offset_x = (size - new_w) / 2;
  let offset_y = (size - new_h) / 2;

  let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

  let side = size as usize;
  let plane = side * side;
  let mut data = vec![YOLO_PAD_VALUE; YOLO_RGB_CHANNELS * plane];
  for (x, y, pixel) in resized.enumerate_pixels() {
    let idx = (y + offset_y) as usize * side + (x + offset_x) as usize;
    for c in 0..YOLO_RGB_CHANNELS {
      data[c * plane + idx] = pixel[c] as f32 / 255.0;
    }
  }

  (
    data,
    Letterbox {
      scale,
      pad_x: offset_x as f32,
      pad_y: offset_y as f32,
    },
  )
}

impl Model for Yolo {
  type Input = Path;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Path) -> Result<DetectResult, ModelError> {
    let image = image::open(input)?.to_rgb8();
    let (orig_w, orig_h) = image.dimensions();

    let size = self.config.input_size as usize;
    let (pixels, letterbox) = letterbox(&image, self.config.input_size);
    debug!("预处理: 原图 {}x{}, {:?}", orig_w, orig_h, letterbox);
    let input_tensor = Tensor::from_array(([1usize, YOLO_RGB_CHANNELS, size, size], pixels))
      .map_err(|e| ModelError::Runtime(e.to_string()))?;

    debug!("执行模型推理");
    let now = Instant::now();
    let (dims, data) = {
      let mut session = self.session.lock().map_err(|_| ModelError::Poisoned)?;
      let outputs = session
        .run(ort::inputs![input_tensor])
        .map_err(|e| ModelError::Runtime(e.to_string()))?;
      let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| ModelError::Output(e.to_string()))?;
      (shape.iter().copied().collect::<Vec<i64>>(), data.to_vec())
    };
    debug!("模型推理耗时: {:.2?}, 输出形状: {:?}", now.elapsed(), dims);

    let params = DecodeParams {
      letterbox,
      orig_w: orig_w as f32,
      orig_h: orig_h as f32,
      confidence_threshold: self.config.confidence_threshold,
    };
    let candidates = decode_output(&dims, &data, &params, &self.labels)?;
    debug!("置信度过滤后候选框: {}", candidates.len());

    let items = nms(candidates, self.config.iou_threshold);
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

#[derive(Debug, Clone, Copy)]
struct DecodeParams {
  letterbox: Letterbox,
  orig_w: f32,
  orig_h: f32,
  confidence_threshold: f32,
}

/// 解码 `[1, 4 + nc, anchors]` 形式的输出，也接受转置后的 `[1, anchors, 4 + nc]`。
/// 框坐标去掉填充和缩放后映射回原图像素坐标。
fn decode_output(
  dims: &[i64],
  data: &[f32],
  params: &DecodeParams,
  labels: &BTreeMap<u32, String>,
) -> Result<Vec<DetectItem>, ModelError> {
  let [batch, d1, d2] = dims else {
    return Err(ModelError::Output(format!("expected 3-D output, got {:?}", dims)));
  };
  if *batch != 1 || *d1 <= 0 || *d2 <= 0 {
    return Err(ModelError::Output(format!("unsupported output shape {:?}", dims)));
  }

  let (d1, d2) = (*d1 as usize, *d2 as usize);
  // 类别表已知时按属性数确定布局；否则属性维至少含 4 个坐标加 1 个类别分数，且通常小于锚点数
  let known_attrs = (!labels.is_empty()).then(|| labels.len() + YOLO_BOX_ATTRS);
  let channels_first = match known_attrs {
    Some(attrs) if attrs == d1 => true,
    Some(attrs) if attrs == d2 => false,
    _ if d1 <= YOLO_BOX_ATTRS => false,
    _ if d2 <= YOLO_BOX_ATTRS => true,
    _ => d1 <= d2,
  };
  let (attrs, anchors) = if channels_first { (d1, d2) } else { (d2, d1) };

  if attrs <= YOLO_BOX_ATTRS {
    return Err(ModelError::Output(format!(
      "output has {} attributes per box, expected more than {}",
      attrs, YOLO_BOX_ATTRS
    )));
  }
  if data.len() != attrs * anchors {
    return Err(ModelError::Output(format!(
      "output length {} does not match shape {:?}",
      data.len(),
      dims
    )));
  }

  let at = |attr: usize, anchor: usize| {
    if channels_first {
      data[attr * anchors + anchor]
    } else {
      data[anchor * attrs + attr]
    }
  };

  let Letterbox { scale, pad_x, pad_y } = params.letterbox;
  if scale.is_nan() || scale <= 0.0 {
    return Err(ModelError::Output(format!("invalid letterbox scale {}", scale)));
  }
  let mut items = Vec::new();

  for anchor in 0..anchors {
    let (class_id, score) = (YOLO_BOX_ATTRS..attrs)
      .map(|attr| ((attr - YOLO_BOX_ATTRS) as u32, at(attr, anchor)))
      .fold((0u32, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if !score.is_finite() || score < params.confidence_threshold {
      continue;
    }

    let cx = at(0, anchor);
    let cy = at(1, anchor);
    let w = at(2, anchor);
    let h = at(3, anchor);

    let x_min = ((cx - w / 2.0 - pad_x) / scale).clamp(0.0, params.orig_w);
    let y_min = ((cy - h / 2.0 - pad_y) / scale).clamp(0.0, params.orig_h);
    let x_max = ((cx + w / 2.0 - pad_x) / scale).clamp(0.0, params.orig_w);
    let y_max = ((cy + h / 2.0 - pad_y) / scale).clamp(0.0, params.orig_h);

    // NaN 比较恒为 false，这里一并过滤
    if !(x_min < x_max && y_min < y_max) {
      continue;
    }

    items.push(DetectItem {
      class_id,
      label: label_for(labels, class_id),
      score: score.clamp(0.0, 1.0),
      bbox: [x_min, y_min, x_max, y_max],
    });
  }

  Ok(items)
}

/// 同类别非极大值抑制，结果按置信度降序
fn nms(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem> = Vec::new();
  for item in items {
    if kept.len() >= YOLO_MAX_DETECTIONS {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == item.class_id && iou(&k.bbox, &item.bbox) >= iou_threshold);
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}
