// 该文件是 Yingxi （影析） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use yingxi::task::RunOptions;

/// Yingxi 视频目标检测与标注
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入视频文件
  #[arg(value_name = "VIDEO")]
  pub video: PathBuf,

  /// DETR ONNX 模型，例如 detr:///models/detr-resnet-50.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 采样周期（毫秒），不指定时逐帧处理
  #[arg(long, value_name = "MS")]
  pub period_ms: Option<f64>,

  /// 处理过程中显示标注后的帧
  #[arg(long)]
  pub display: bool,

  /// 逐帧保存标注图像的目录
  #[arg(long, value_name = "DIR")]
  pub image_dir: Option<PathBuf>,

  /// 输出视频的目录
  #[arg(long, value_name = "DIR")]
  pub video_dir: Option<PathBuf>,

  /// JSON 配置文件（受限类别、颜色、置信度阈值）
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)，覆盖配置文件
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,
}

impl Args {
  pub fn run_options(&self) -> RunOptions {
    RunOptions {
      period_ms: self.period_ms,
      display: self.display,
      image_dir: self.image_dir.clone(),
      video_dir: self.video_dir.clone(),
    }
  }
}
