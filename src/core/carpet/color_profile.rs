//! 颜色特征提取
//!
//! 只采样四角 + 中心五个区域，避免光照不均带来的偏差，同时限制计算量。

use super::frame::{luma, Frame};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 量化后的主色
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DominantColor {
    pub rgb: [u8; 3],
    /// 占采样像素的比例 (0.0-1.0)
    #[serde(default)]
    pub frequency: f32,
}

/// 用于比对的精简颜色签名（参考库中也是这个结构）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorSignature {
    pub dominant_colors: Vec<DominantColor>,
    pub variance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorProfile {
    /// 按频率降序，最多 top_n 个
    pub dominant_colors: Vec<DominantColor>,
    pub brightness_variance: f32,
    /// max / max(min, 1)
    pub contrast_ratio: f32,
    pub mean_saturation: f32,
    /// 256 bins 亮度直方图，仅用于诊断
    pub brightness_histogram: Vec<u32>,
    pub sampled_pixels: usize,
    pub total_pixels: usize,
}

impl ColorProfile {
    /// 零样本时的中性结果
    pub fn empty(total_pixels: usize) -> Self {
        Self {
            dominant_colors: Vec::new(),
            brightness_variance: 0.0,
            contrast_ratio: 0.0,
            mean_saturation: 0.0,
            brightness_histogram: vec![0; 256],
            sampled_pixels: 0,
            total_pixels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sampled_pixels == 0 || self.dominant_colors.is_empty()
    }

    pub fn signature(&self) -> ColorSignature {
        ColorSignature {
            dominant_colors: self.dominant_colors.clone(),
            variance: self.brightness_variance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColorConfig {
    /// 工作分辨率（正方形边长）
    pub working_size: u32,
    /// 每个采样区域边长占工作分辨率的比例
    pub region_fraction: f32,
    /// 四角区域距边缘的留白比例
    pub region_margin_fraction: f32,
    pub sample_step: u32,
    /// 每通道量化级数
    pub quantization_levels: u32,
    pub top_n: usize,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            working_size: 320,
            region_fraction: 0.25,
            region_margin_fraction: 0.0625,
            sample_step: 2,
            quantization_levels: 16,
            top_n: 8,
        }
    }
}

/// 感知加权距离（通道权重近似亮度敏感度），范围 [0, 255]
pub fn weighted_distance(a: [u8; 3], b: [u8; 3]) -> f32 {
    let dr = a[0] as f32 - b[0] as f32;
    let dg = a[1] as f32 - b[1] as f32;
    let db = a[2] as f32 - b[2] as f32;
    (0.30 * dr * dr + 0.59 * dg * dg + 0.11 * db * db).sqrt()
}

/// (max - min) / max，max 为 0 时返回 0
pub fn saturation(r: u8, g: u8, b: u8) -> f32 {
    let max = r.max(g).max(b) as f32;
    let min = r.min(g).min(b) as f32;
    if max == 0.0 {
        0.0
    } else {
        (max - min) / max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SampleRegion {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

pub struct ColorProfileExtractor {
    config: ColorConfig,
}

impl ColorProfileExtractor {
    pub fn new() -> Self {
        Self::with_config(ColorConfig::default())
    }

    pub fn with_config(config: ColorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ColorConfig {
        &self.config
    }

    pub fn extract(&self, frame: &Frame) -> ColorProfile {
        let total_pixels = frame.pixel_count();
        if let Err(e) = frame.validate() {
            warn!("⚠️ Color extraction skipped: {}", e);
            return ColorProfile::empty(total_pixels);
        }

        let size = self.config.working_size.max(1);
        let working = match frame.resize_to(size, size) {
            Ok(f) => f,
            Err(e) => {
                warn!("⚠️ Color extraction resize failed: {}", e);
                return ColorProfile::empty(total_pixels);
            }
        };

        let step = self.config.sample_step.max(1) as usize;
        let mut buckets: HashMap<[u8; 3], u32> = HashMap::new();
        let mut histogram = vec![0u32; 256];
        let mut sampled = 0usize;
        let mut sum = 0f64;
        let mut sum_sq = 0f64;
        let mut min_brightness = f32::MAX;
        let mut max_brightness = 0f32;
        let mut saturation_sum = 0f64;

        for region in self.sample_regions(size) {
            for y in (region.y0..region.y1).step_by(step) {
                for x in (region.x0..region.x1).step_by(step) {
                    let Some([r, g, b]) = working.rgb_at(x, y) else {
                        continue;
                    };

                    let key = [self.quantize(r), self.quantize(g), self.quantize(b)];
                    *buckets.entry(key).or_insert(0) += 1;

                    let l = luma(r, g, b);
                    sum += l as f64;
                    sum_sq += (l as f64) * (l as f64);
                    min_brightness = min_brightness.min(l);
                    max_brightness = max_brightness.max(l);
                    histogram[(l.round() as usize).min(255)] += 1;
                    saturation_sum += saturation(r, g, b) as f64;
                    sampled += 1;
                }
            }
        }

        if sampled == 0 {
            return ColorProfile::empty(total_pixels);
        }

        let n = sampled as f64;
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0) as f32;

        let mut ranked: Vec<([u8; 3], u32)> = buckets.into_iter().collect();
        // 频率相同时按颜色值排序，保证结果确定
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let dominant_colors: Vec<DominantColor> = ranked
            .into_iter()
            .take(self.config.top_n)
            .map(|(rgb, count)| DominantColor {
                rgb,
                frequency: count as f32 / sampled as f32,
            })
            .collect();

        let profile = ColorProfile {
            dominant_colors,
            brightness_variance: variance,
            contrast_ratio: max_brightness / min_brightness.max(1.0),
            mean_saturation: (saturation_sum / n) as f32,
            brightness_histogram: histogram,
            sampled_pixels: sampled,
            total_pixels,
        };

        debug!(
            "🎨 Color profile: {} dominant, variance={:.1}, contrast={:.2}, saturation={:.2}, samples={}",
            profile.dominant_colors.len(),
            profile.brightness_variance,
            profile.contrast_ratio,
            profile.mean_saturation,
            profile.sampled_pixels
        );

        profile
    }

    /// 粗量化到桶中心
    fn quantize(&self, v: u8) -> u8 {
        let levels = self.config.quantization_levels.clamp(2, 256);
        let bucket_size = 256 / levels;
        let bucket = v as u32 / bucket_size;
        (bucket * bucket_size + bucket_size / 2).min(255) as u8
    }

    /// 四角 + 中心
    fn sample_regions(&self, size: u32) -> Vec<SampleRegion> {
        let side = ((size as f32 * self.config.region_fraction) as u32).clamp(1, size);
        let margin = (size as f32 * self.config.region_margin_fraction) as u32;
        let far = size.saturating_sub(margin + side);
        let near = margin.min(far);
        let center = (size - side) / 2;

        [
            (near, near),
            (far, near),
            (near, far),
            (far, far),
            (center, center),
        ]
        .into_iter()
        .map(|(x0, y0)| SampleRegion {
            x0,
            y0,
            x1: (x0 + side).min(size),
            y1: (y0 + side).min(size),
        })
        .collect()
    }
}

impl Default for ColorProfileExtractor {
    fn default() -> Self {
        Self::new()
    }
}
