//! 纹理特征提取：边缘密度、局部对比度、重复度、颜色复杂度、图案分类

use super::frame::Frame;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternFamily {
    Geometric,
    Ornamental,
    Plain,
    Mixed,
}

impl PatternFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternFamily::Geometric => "geometric",
            PatternFamily::Ornamental => "ornamental",
            PatternFamily::Plain => "plain",
            PatternFamily::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureFeatures {
    /// 0.0-1.0
    pub contrast: f32,
    /// 每 100 个采样像素中的边缘像素数
    pub edge_density: f32,
    /// 0.0-1.0
    pub repetition_score: f32,
    /// 0.0-1.0
    pub color_complexity: f32,
    pub pattern: PatternFamily,
}

impl TextureFeatures {
    pub fn empty() -> Self {
        Self {
            contrast: 0.0,
            edge_density: 0.0,
            repetition_score: 0.0,
            color_complexity: 0.0,
            pattern: PatternFamily::Mixed,
        }
    }
}

/// 图案分类阈值（规则按顺序匹配）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatternThresholds {
    pub geometric_edge_density: f32,
    pub geometric_repetition: f32,
    pub ornamental_contrast: f32,
    pub ornamental_edge_density: f32,
    pub plain_edge_density: f32,
    pub plain_contrast: f32,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            geometric_edge_density: 15.0,
            geometric_repetition: 0.6,
            ornamental_contrast: 0.25,
            ornamental_edge_density: 8.0,
            plain_edge_density: 5.0,
            plain_contrast: 0.15,
        }
    }
}

/// 纯函数：相同输入永远得到相同分类
pub fn classify_pattern(
    edge_density: f32,
    contrast: f32,
    repetition_score: f32,
    thresholds: &PatternThresholds,
) -> PatternFamily {
    if edge_density >= thresholds.geometric_edge_density
        && repetition_score >= thresholds.geometric_repetition
    {
        PatternFamily::Geometric
    } else if contrast >= thresholds.ornamental_contrast
        && edge_density >= thresholds.ornamental_edge_density
    {
        PatternFamily::Ornamental
    } else if edge_density < thresholds.plain_edge_density && contrast < thresholds.plain_contrast {
        PatternFamily::Plain
    } else {
        PatternFamily::Mixed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextureConfig {
    pub working_size: u32,
    /// Sobel 梯度幅值阈值
    pub edge_threshold: f32,
    pub contrast_window: usize,
    pub block_size: usize,
    /// 块相似度超过该值计为重复
    pub repetition_similarity: f32,
    pub complexity_stride: usize,
    /// 每通道量化级数
    pub complexity_levels: u32,
    /// 归一化上限（不同颜色数）
    pub complexity_cap: usize,
    pub pattern: PatternThresholds,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            working_size: 200,
            edge_threshold: 100.0,
            contrast_window: 5,
            block_size: 16,
            repetition_similarity: 0.85,
            complexity_stride: 3,
            complexity_levels: 8,
            complexity_cap: 64,
            pattern: PatternThresholds::default(),
        }
    }
}

pub struct TextureFeatureExtractor {
    config: TextureConfig,
}

impl TextureFeatureExtractor {
    pub fn new() -> Self {
        Self::with_config(TextureConfig::default())
    }

    pub fn with_config(config: TextureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TextureConfig {
        &self.config
    }

    pub fn extract(&self, frame: &Frame) -> TextureFeatures {
        if let Err(e) = frame.validate() {
            warn!("⚠️ Texture extraction skipped: {}", e);
            return TextureFeatures::empty();
        }

        let size = self.config.working_size.max(1);
        let working = match frame.resize_to(size, size) {
            Ok(f) => f,
            Err(e) => {
                warn!("⚠️ Texture extraction resize failed: {}", e);
                return TextureFeatures::empty();
            }
        };

        let w = working.width as usize;
        let h = working.height as usize;
        let gray = working.to_luma();

        let edge_density = self.edge_density(&gray, w, h);
        let contrast = self.local_contrast(&gray, w, h);
        let repetition_score = self.repetition_score(&gray, w, h);
        let color_complexity = self.color_complexity(&working);
        let pattern = classify_pattern(edge_density, contrast, repetition_score, &self.config.pattern);

        debug!(
            "🧵 Texture: edges={:.1}/100, contrast={:.3}, repetition={:.3}, complexity={:.3}, pattern={}",
            edge_density,
            contrast,
            repetition_score,
            color_complexity,
            pattern.as_str()
        );

        TextureFeatures {
            contrast,
            edge_density,
            repetition_score,
            color_complexity,
            pattern,
        }
    }

    /// 3x3 Sobel，统计幅值超过阈值的内部像素
    fn edge_density(&self, gray: &[u8], w: usize, h: usize) -> f32 {
        if w < 3 || h < 3 {
            return 0.0;
        }

        let px = |x: usize, y: usize| gray[y * w + x] as i32;
        let threshold_sq = self.config.edge_threshold * self.config.edge_threshold;
        let mut edge_count = 0usize;
        let mut total = 0usize;

        for y in 1..(h - 1) {
            for x in 1..(w - 1) {
                let gx = (px(x + 1, y - 1) + 2 * px(x + 1, y) + px(x + 1, y + 1))
                    - (px(x - 1, y - 1) + 2 * px(x - 1, y) + px(x - 1, y + 1));
                let gy = (px(x - 1, y + 1) + 2 * px(x, y + 1) + px(x + 1, y + 1))
                    - (px(x - 1, y - 1) + 2 * px(x, y - 1) + px(x + 1, y - 1));

                // 比较平方，避免开方
                if ((gx * gx + gy * gy) as f32) > threshold_sq {
                    edge_count += 1;
                }
                total += 1;
            }
        }

        edge_count as f32 * 100.0 / total as f32
    }

    /// 不重叠窗口内 (max - min) / 255 的平均值
    fn local_contrast(&self, gray: &[u8], w: usize, h: usize) -> f32 {
        let win = self.config.contrast_window.max(1);
        let mut sum = 0f32;
        let mut windows = 0usize;

        for wy in (0..h).step_by(win).filter(|wy| wy + win <= h) {
            for wx in (0..w).step_by(win).filter(|wx| wx + win <= w) {
                let mut min = u8::MAX;
                let mut max = u8::MIN;
                for y in wy..wy + win {
                    for &v in &gray[y * w + wx..y * w + wx + win] {
                        min = min.min(v);
                        max = max.max(v);
                    }
                }
                sum += (max - min) as f32 / 255.0;
                windows += 1;
            }
        }

        if windows == 0 {
            0.0
        } else {
            sum / windows as f32
        }
    }

    /// 相邻块（右、下）的平均绝对差 → 相似度，统计超过阈值的比例
    fn repetition_score(&self, gray: &[u8], w: usize, h: usize) -> f32 {
        let bs = self.config.block_size.max(1);
        let blocks_x = w / bs;
        let blocks_y = h / bs;

        let block_similarity = |ax: usize, ay: usize, bx: usize, by: usize| -> f32 {
            let mut diff_sum = 0u32;
            for dy in 0..bs {
                let row_a = (ay * bs + dy) * w + ax * bs;
                let row_b = (by * bs + dy) * w + bx * bs;
                for dx in 0..bs {
                    diff_sum += (gray[row_a + dx] as i32 - gray[row_b + dx] as i32).unsigned_abs();
                }
            }
            let mean_diff = diff_sum as f32 / (bs * bs) as f32;
            1.0 - mean_diff / 255.0
        };

        let mut pairs = 0usize;
        let mut repeated = 0usize;

        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                if bx + 1 < blocks_x {
                    pairs += 1;
                    if block_similarity(bx, by, bx + 1, by) >= self.config.repetition_similarity {
                        repeated += 1;
                    }
                }
                if by + 1 < blocks_y {
                    pairs += 1;
                    if block_similarity(bx, by, bx, by + 1) >= self.config.repetition_similarity {
                        repeated += 1;
                    }
                }
            }
        }

        if pairs == 0 {
            0.0
        } else {
            repeated as f32 / pairs as f32
        }
    }

    /// 稀疏采样下的不同量化颜色数，按经验上限归一化
    fn color_complexity(&self, frame: &Frame) -> f32 {
        let stride = self.config.complexity_stride.max(1);
        let shift = 8 - self.config.complexity_levels.clamp(2, 256).ilog2().min(8);
        let mut seen: HashSet<[u8; 3]> = HashSet::new();

        for y in (0..frame.height).step_by(stride) {
            for x in (0..frame.width).step_by(stride) {
                if let Some([r, g, b]) = frame.rgb_at(x, y) {
                    seen.insert([r >> shift, g >> shift, b >> shift]);
                }
            }
        }

        let cap = self.config.complexity_cap.max(1);
        (seen.len() as f32 / cap as f32).min(1.0)
    }
}

impl Default for TextureFeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}
