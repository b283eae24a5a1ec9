// 该文件是 Tumorscope 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::detection::DetectionResult;

const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const BOX_THICKNESS: i32 = 2;

/// 在图像上绘制检测框，bbox 为原图像素坐标
pub fn draw_detections(image: &mut RgbImage, result: &DetectionResult) {
  let (w, h) = (image.width() as i32, image.height() as i32);
  if w == 0 || h == 0 {
    return;
  }

  for det in result.detections() {
    let [x1, y1, x2, y2] = det.bbox();
    let x_min = (x1.floor() as i32).clamp(0, w - 1);
    let y_min = (y1.floor() as i32).clamp(0, h - 1);
    let x_max = (x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (y2.ceil() as i32).clamp(0, h - 1);

    // 边框向内加粗
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(BOX_COLOR));
    }
  }
}
