//! 地毯可能性预筛：在昂贵的比对之前拒绝手、人脸、天空之类的画面

use super::color_profile::{weighted_distance, ColorProfile};
use super::confidence::Band;
use super::frame::Frame;
use super::texture::{PatternFamily, TextureFeatures};
use log::debug;
use serde::{Deserialize, Serialize};

/// 肤色 RGB 区间桶（闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkinToneRange {
    pub r: (u8, u8),
    pub g: (u8, u8),
    pub b: (u8, u8),
}

impl SkinToneRange {
    pub const fn new(r: (u8, u8), g: (u8, u8), b: (u8, u8)) -> Self {
        Self { r, g, b }
    }

    fn contains(&self, [r, g, b]: [u8; 3]) -> bool {
        (self.r.0..=self.r.1).contains(&r)
            && (self.g.0..=self.g.1).contains(&g)
            && (self.b.0..=self.b.1).contains(&b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikelihoodWeights {
    pub color: f32,
    pub texture: f32,
    pub statistical: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GateConfig {
    pub skin_ranges: Vec<SkinToneRange>,
    /// 肤色像素 g/r 比例区间，排除橙色、砖红等地毯常见色
    pub skin_green_ratio: Band,
    /// 肤色像素 b/g 比例区间，排除金色、芥末黄
    pub skin_blue_ratio: Band,
    /// 肤色像素占比超过该值直接拒绝
    pub skin_fraction_threshold: f32,
    /// 肤色检测的目标采样数
    pub skin_sample_target: usize,
    /// 常见地毯色板（大地色、深红、墨绿、金色等）
    pub carpet_palette: Vec<[u8; 3]>,
    /// 与色板颜色的最大加权距离
    pub palette_distance: f32,
    pub edge_band: Band,
    pub contrast_band: Band,
    pub variance_band: Band,
    pub saturation_band: Band,
    pub min_repetition: f32,
    pub weights: LikelihoodWeights,
    pub pass_threshold: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            skin_ranges: vec![
                SkinToneRange::new((220, 255), (170, 235), (110, 200)),
                SkinToneRange::new((180, 240), (120, 185), (60, 150)),
                SkinToneRange::new((150, 200), (90, 140), (40, 110)),
                SkinToneRange::new((120, 170), (65, 110), (25, 75)),
            ],
            skin_green_ratio: Band::new(0.58, 0.88),
            skin_blue_ratio: Band::new(0.40, 0.95),
            skin_fraction_threshold: 0.30,
            skin_sample_target: 10_000,
            carpet_palette: vec![
                [128, 0, 32],   // burgundy
                [139, 0, 0],    // deep red
                [150, 30, 40],  // crimson
                [183, 65, 14],  // rust
                [160, 82, 45],  // terracotta
                [101, 67, 33],  // brown
                [212, 175, 55], // gold
                [200, 160, 60], // mustard
                [107, 107, 47], // olive
                [34, 85, 51],   // forest green
                [0, 128, 128],  // teal
                [0, 90, 90],    // dark teal
                [31, 40, 80],   // navy
                [60, 60, 60],   // charcoal
                [128, 128, 128],
                [240, 230, 200], // cream
                [225, 210, 180], // beige
            ],
            palette_distance: 45.0,
            edge_band: Band::new(3.0, 60.0),
            contrast_band: Band::new(0.08, 0.7),
            variance_band: Band::new(30.0, 5000.0),
            saturation_band: Band::new(0.08, 0.85),
            min_repetition: 0.2,
            weights: LikelihoodWeights {
                color: 0.4,
                texture: 0.35,
                statistical: 0.25,
            },
            pass_threshold: 0.30,
        }
    }
}

impl GateConfig {
    /// 误检代价高的场景（例如积分发放）
    pub fn strict() -> Self {
        Self {
            skin_fraction_threshold: 0.2,
            pass_threshold: 0.4,
            ..Default::default()
        }
    }

    /// 光线差、色彩偏移大的场馆
    pub fn lenient() -> Self {
        Self {
            skin_fraction_threshold: 0.4,
            palette_distance: 60.0,
            pass_threshold: 0.2,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GateDecision {
    Pass,
    EmptyFrame,
    SkinTone,
    LowLikelihood,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikelihoodReport {
    pub skin_fraction: f32,
    pub color_plausibility: f32,
    pub texture_plausibility: f32,
    pub statistical_plausibility: f32,
    pub score: f32,
    pub decision: GateDecision,
}

impl LikelihoodReport {
    fn rejected(decision: GateDecision, skin_fraction: f32) -> Self {
        Self {
            skin_fraction,
            color_plausibility: 0.0,
            texture_plausibility: 0.0,
            statistical_plausibility: 0.0,
            score: 0.0,
            decision,
        }
    }

    pub fn passed(&self) -> bool {
        self.decision == GateDecision::Pass
    }
}

pub struct CarpetLikelihoodGate {
    config: GateConfig,
}

impl CarpetLikelihoodGate {
    pub fn new() -> Self {
        Self::with_config(GateConfig::default())
    }

    pub fn with_config(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn evaluate(
        &self,
        frame: &Frame,
        color: &ColorProfile,
        texture: &TextureFeatures,
    ) -> LikelihoodReport {
        if frame.validate().is_err() || color.is_empty() {
            return LikelihoodReport::rejected(GateDecision::EmptyFrame, 0.0);
        }

        let skin_fraction = self.skin_fraction(frame);
        if skin_fraction > self.config.skin_fraction_threshold {
            debug!("✋ Gate: skin fraction {:.2}, rejecting", skin_fraction);
            return LikelihoodReport::rejected(GateDecision::SkinTone, skin_fraction);
        }

        let color_plausibility = self.color_plausibility(color);
        let texture_plausibility = self.texture_plausibility(texture);
        let statistical_plausibility = self.statistical_plausibility(color, texture);

        let w = &self.config.weights;
        let score = (w.color * color_plausibility
            + w.texture * texture_plausibility
            + w.statistical * statistical_plausibility)
            .clamp(0.0, 1.0);

        let decision = if score > self.config.pass_threshold {
            GateDecision::Pass
        } else {
            GateDecision::LowLikelihood
        };

        debug!(
            "🚪 Gate: skin={:.2} color={:.2} texture={:.2} stats={:.2} -> {:.2} {:?}",
            skin_fraction,
            color_plausibility,
            texture_plausibility,
            statistical_plausibility,
            score,
            decision
        );

        LikelihoodReport {
            skin_fraction,
            color_plausibility,
            texture_plausibility,
            statistical_plausibility,
            score,
            decision,
        }
    }

    fn is_skin(&self, rgb: [u8; 3]) -> bool {
        let [r, g, b] = rgb;
        if !(r > g && g > b) {
            return false;
        }
        let green_ratio = g as f32 / r as f32;
        let blue_ratio = b as f32 / g as f32;
        self.config.skin_green_ratio.contains(green_ratio)
            && self.config.skin_blue_ratio.contains(blue_ratio)
            && self.config.skin_ranges.iter().any(|range| range.contains(rgb))
    }

    /// 按步长稀疏采样整帧
    fn skin_fraction(&self, frame: &Frame) -> f32 {
        let target = self.config.skin_sample_target.max(1);
        let stride = ((frame.pixel_count() as f32 / target as f32).sqrt().ceil() as usize).max(1);

        let mut skin = 0usize;
        let mut total = 0usize;
        for y in (0..frame.height).step_by(stride) {
            for x in (0..frame.width).step_by(stride) {
                if let Some(rgb) = frame.rgb_at(x, y) {
                    if self.is_skin(rgb) {
                        skin += 1;
                    }
                    total += 1;
                }
            }
        }

        if total == 0 {
            0.0
        } else {
            skin as f32 / total as f32
        }
    }

    /// 落在色板附近的主色比例
    fn color_plausibility(&self, color: &ColorProfile) -> f32 {
        if color.dominant_colors.is_empty() || self.config.carpet_palette.is_empty() {
            return 0.0;
        }
        let near = color
            .dominant_colors
            .iter()
            .filter(|c| {
                self.config
                    .carpet_palette
                    .iter()
                    .any(|&p| weighted_distance(c.rgb, p) <= self.config.palette_distance)
            })
            .count();
        near as f32 / color.dominant_colors.len() as f32
    }

    fn texture_plausibility(&self, texture: &TextureFeatures) -> f32 {
        let mut score = 0.0;
        if self.config.edge_band.contains(texture.edge_density) {
            score += 0.4;
        }
        if self.config.contrast_band.contains(texture.contrast) {
            score += 0.3;
        }
        if matches!(texture.pattern, PatternFamily::Geometric | PatternFamily::Ornamental) {
            score += 0.3;
        }
        score
    }

    fn statistical_plausibility(&self, color: &ColorProfile, texture: &TextureFeatures) -> f32 {
        let mut score = 0.0;
        if self.config.variance_band.contains(color.brightness_variance) {
            score += 0.4;
        }
        if self.config.saturation_band.contains(color.mean_saturation) {
            score += 0.3;
        }
        if texture.repetition_score >= self.config.min_repetition {
            score += 0.3;
        }
        score
    }
}

impl Default for CarpetLikelihoodGate {
    fn default() -> Self {
        Self::new()
    }
}
