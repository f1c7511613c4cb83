//! 置信度策略表：权重、阈值、图案评分表、颜色加分表、纹理区间、定位融合
//!
//! 纯数据 + 纯函数，可以通过 JSON 整体替换做调参 / A-B 测试。

use super::color_profile::ColorProfile;
use super::error::CarpetError;
use super::texture::{PatternFamily, TextureFeatures};
use serde::{Deserialize, Serialize};

const WEIGHT_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureWeights {
    pub color: f32,
    pub pattern: f32,
    pub texture: f32,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            color: 0.35,
            pattern: 0.38,
            texture: 0.27,
        }
    }
}

impl FeatureWeights {
    pub fn sum(&self) -> f32 {
        self.color + self.pattern + self.texture
    }

    /// 归一化到和为 1；有负数 / 非有限值 / 全零时返回 None
    pub fn normalized(&self) -> Option<Self> {
        let parts = [self.color, self.pattern, self.texture];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return None;
        }
        let total = self.sum();
        if total <= f32::EPSILON {
            return None;
        }
        Some(Self {
            color: self.color / total,
            pattern: self.pattern / total,
            texture: self.texture / total,
        })
    }
}

/// 各通道的信息量 (0.0-1.0)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightSignals {
    pub color: f32,
    pub pattern: f32,
    pub texture: f32,
}

impl WeightSignals {
    fn sanitized(&self) -> Self {
        let clean = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            color: clean(self.color),
            pattern: clean(self.pattern),
            texture: clean(self.texture),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityLevel {
    Excellent,
    Good,
    Moderate,
    Weak,
    Poor,
}

impl SimilarityLevel {
    pub fn label(&self) -> &'static str {
        match self {
            SimilarityLevel::Excellent => "excellent",
            SimilarityLevel::Good => "good",
            SimilarityLevel::Moderate => "moderate",
            SimilarityLevel::Weak => "weak",
            SimilarityLevel::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimilarityThresholds {
    pub excellent: f32,
    pub good: f32,
    pub moderate: f32,
    pub weak: f32,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            excellent: 0.85,
            good: 0.70,
            moderate: 0.50,
            weak: 0.30,
        }
    }
}

/// 检测图案族与参考图案族的匹配等级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternGrade {
    Exact,
    Close,
    Related,
    Partial,
    None,
}

impl PatternGrade {
    pub fn between(detected: PatternFamily, reference: PatternFamily) -> Self {
        use PatternFamily::*;
        match (detected, reference) {
            (a, b) if a == b => PatternGrade::Exact,
            (Mixed, Geometric) | (Mixed, Ornamental) | (Geometric, Mixed) | (Ornamental, Mixed) => {
                PatternGrade::Close
            }
            (Geometric, Ornamental) | (Ornamental, Geometric) => PatternGrade::Related,
            (Plain, Mixed) | (Mixed, Plain) => PatternGrade::Partial,
            _ => PatternGrade::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatternScoreTable {
    pub exact: f32,
    pub close: f32,
    pub related: f32,
    pub partial: f32,
    pub none: f32,
    /// 纹理特征符合参考图案族预期时的加分
    pub consistency_bonus: f32,
    /// 一致性判断用的重复度 / 边缘密度阈值
    pub high_repetition: f32,
    pub high_edge_density: f32,
    pub low_edge_density: f32,
}

impl Default for PatternScoreTable {
    fn default() -> Self {
        Self {
            exact: 1.0,
            close: 0.75,
            related: 0.5,
            partial: 0.3,
            none: 0.1,
            consistency_bonus: 0.1,
            high_repetition: 0.6,
            high_edge_density: 15.0,
            low_edge_density: 5.0,
        }
    }
}

impl PatternScoreTable {
    pub fn score(&self, grade: PatternGrade) -> f32 {
        match grade {
            PatternGrade::Exact => self.exact,
            PatternGrade::Close => self.close,
            PatternGrade::Related => self.related,
            PatternGrade::Partial => self.partial,
            PatternGrade::None => self.none,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorBonusTier {
    pub min_similarity: f32,
    /// 置信度加分（0-100 刻度）
    pub bonus: f32,
}

/// [min, max] 纹理强度区间
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f32,
    pub max: f32,
}

impl Band {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, v: f32) -> bool {
        v >= self.min && v <= self.max
    }

    /// 到区间的距离，区间内为 0
    pub fn distance(&self, v: f32) -> f32 {
        if v < self.min {
            self.min - v
        } else if v > self.max {
            v - self.max
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextureBands {
    /// 参考方差低于该值预期低纹理
    pub variance_low: f32,
    /// 参考方差高于该值预期高纹理
    pub variance_high: f32,
    pub low: Band,
    pub moderate: Band,
    pub high: Band,
    /// 对比度归一化尺度
    pub contrast_scale: f32,
    /// 边缘密度归一化尺度（每 100 像素）
    pub edge_scale: f32,
    /// 偏离区间多远时相似度降为 0
    pub falloff: f32,
}

impl Default for TextureBands {
    fn default() -> Self {
        Self {
            variance_low: 60.0,
            variance_high: 150.0,
            low: Band::new(0.0, 0.35),
            moderate: Band::new(0.3, 0.7),
            high: Band::new(0.6, 1.0),
            contrast_scale: 0.5,
            edge_scale: 30.0,
            falloff: 0.5,
        }
    }
}

impl TextureBands {
    pub fn expected_band(&self, reference_variance: f32) -> Band {
        if reference_variance >= self.variance_high {
            self.high
        } else if reference_variance <= self.variance_low {
            self.low
        } else {
            self.moderate
        }
    }

    /// 对比度和边缘密度合成的纹理强度 (0.0-1.0)
    pub fn texture_level(&self, contrast: f32, edge_density: f32) -> f32 {
        let c = (contrast / self.contrast_scale.max(f32::EPSILON)).clamp(0.0, 1.0);
        let e = (edge_density / self.edge_scale.max(f32::EPSILON)).clamp(0.0, 1.0);
        0.5 * c + 0.5 * e
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceBand {
    pub max_distance_m: f32,
    pub boost: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocationBlending {
    /// 仅视觉时的置信度上限
    pub vision_only_cap: f32,
    /// 融合定位后的置信度上限
    pub location_cap: f32,
    /// 定位加分折算到置信度的比例
    pub boost_weight: f32,
    /// 统计附近候选的半径
    pub nearby_radius_m: f32,
    /// 按距离升序
    pub distance_bands: Vec<DistanceBand>,
}

impl Default for LocationBlending {
    fn default() -> Self {
        Self {
            vision_only_cap: 85.0,
            location_cap: 98.0,
            boost_weight: 0.2,
            nearby_radius_m: 500.0,
            distance_bands: vec![
                DistanceBand { max_distance_m: 25.0, boost: 100.0 },
                DistanceBand { max_distance_m: 50.0, boost: 80.0 },
                DistanceBand { max_distance_m: 100.0, boost: 60.0 },
                DistanceBand { max_distance_m: 250.0, boost: 35.0 },
                DistanceBand { max_distance_m: 500.0, boost: 15.0 },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfidenceConfig {
    pub base_weights: FeatureWeights,
    /// 边缘密度达到该值时图案通道视为信息充分
    pub pattern_signal_scale: f32,
    /// 对比度达到该值时纹理通道视为信息充分
    pub texture_signal_scale: f32,
    /// 饱和度达到该值时颜色通道视为信息充分
    pub color_signal_scale: f32,
    pub similarity: SimilarityThresholds,
    pub pattern_scores: PatternScoreTable,
    /// 按 min_similarity 降序
    pub color_bonus: Vec<ColorBonusTier>,
    pub texture_bands: TextureBands,
    /// 参与比较的主色数量
    pub color_compare_k: usize,
    /// 加权距离达到该值时单色相似度为 0
    pub color_distance_scale: f32,
    /// 方差接近度在颜色相似度中的占比
    pub variance_blend: f32,
    pub top_k: usize,
    pub location: LocationBlending,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            base_weights: FeatureWeights::default(),
            pattern_signal_scale: 20.0,
            texture_signal_scale: 0.3,
            color_signal_scale: 0.5,
            similarity: SimilarityThresholds::default(),
            pattern_scores: PatternScoreTable::default(),
            color_bonus: vec![
                ColorBonusTier { min_similarity: 0.9, bonus: 5.0 },
                ColorBonusTier { min_similarity: 0.8, bonus: 3.0 },
                ColorBonusTier { min_similarity: 0.7, bonus: 1.0 },
            ],
            texture_bands: TextureBands::default(),
            color_compare_k: 5,
            color_distance_scale: 160.0,
            variance_blend: 0.15,
            top_k: 5,
            location: LocationBlending::default(),
        }
    }
}

impl ConfidenceConfig {
    /// 颜色优先（图案难辨认的净色地毯场馆）
    pub fn color_first() -> Self {
        Self {
            base_weights: FeatureWeights {
                color: 0.5,
                pattern: 0.28,
                texture: 0.22,
            },
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CarpetError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CarpetError> {
        if self.base_weights.normalized().is_none() {
            return Err(CarpetError::InvalidConfig(format!(
                "base weights {:?} cannot be normalized",
                self.base_weights
            )));
        }
        let s = &self.similarity;
        if !(s.excellent >= s.good && s.good >= s.moderate && s.moderate >= s.weak) {
            return Err(CarpetError::InvalidConfig(
                "similarity thresholds must be non-increasing".to_string(),
            ));
        }
        if self.top_k == 0 || self.color_compare_k == 0 {
            return Err(CarpetError::InvalidConfig(
                "top_k and color_compare_k must be positive".to_string(),
            ));
        }
        if self.color_distance_scale <= 0.0 || !(0.0..=1.0).contains(&self.variance_blend) {
            return Err(CarpetError::InvalidConfig(
                "invalid color distance scale or variance blend".to_string(),
            ));
        }
        let loc = &self.location;
        if !(0.0..=100.0).contains(&loc.vision_only_cap)
            || !(0.0..=100.0).contains(&loc.location_cap)
            || loc.vision_only_cap > loc.location_cap
        {
            return Err(CarpetError::InvalidConfig(format!(
                "invalid confidence caps {} / {}",
                loc.vision_only_cap, loc.location_cap
            )));
        }
        Ok(())
    }

    /// 由当前帧特征推导各通道信息量
    pub fn weight_signals(&self, color: &ColorProfile, texture: &TextureFeatures) -> WeightSignals {
        let color_signal = if color.is_empty() {
            0.0
        } else {
            0.5 + 0.5 * (color.mean_saturation / self.color_signal_scale.max(f32::EPSILON)).min(1.0)
        };
        WeightSignals {
            color: color_signal,
            pattern: texture.edge_density / self.pattern_signal_scale.max(f32::EPSILON),
            texture: texture.contrast / self.texture_signal_scale.max(f32::EPSILON),
        }
        .sanitized()
    }

    /// 动态权重：按信息量在 [0.5, 1.5] 倍之间缩放基础权重后重新归一化。
    /// 结果总和恒为 1，信号全零时回落到基础权重。
    pub fn dynamic_weights(&self, signals: &WeightSignals) -> FeatureWeights {
        let base = self
            .base_weights
            .normalized()
            .unwrap_or_else(|| FeatureWeights::default().normalized().unwrap_or_default());
        let s = signals.sanitized();

        if s.color + s.pattern + s.texture <= f32::EPSILON {
            return base;
        }

        let adjusted = FeatureWeights {
            color: base.color * (0.5 + s.color),
            pattern: base.pattern * (0.5 + s.pattern),
            texture: base.texture * (0.5 + s.texture),
        };
        adjusted.normalized().unwrap_or(base)
    }

    pub fn pattern_match_score(&self, detected: PatternFamily, reference: PatternFamily) -> f32 {
        self.pattern_scores.score(PatternGrade::between(detected, reference))
    }

    pub fn similarity_level(&self, score: f32) -> SimilarityLevel {
        let t = &self.similarity;
        if score >= t.excellent {
            SimilarityLevel::Excellent
        } else if score >= t.good {
            SimilarityLevel::Good
        } else if score >= t.moderate {
            SimilarityLevel::Moderate
        } else if score >= t.weak {
            SimilarityLevel::Weak
        } else {
            SimilarityLevel::Poor
        }
    }

    pub fn color_match_bonus(&self, similarity: f32) -> f32 {
        self.color_bonus
            .iter()
            .find(|tier| similarity >= tier.min_similarity)
            .map(|tier| tier.bonus)
            .unwrap_or(0.0)
    }

    /// 距离越近加分越高，附近候选越多加分越低，范围 [0, 100]
    pub fn location_confidence_boost(&self, distance_m: f32, nearby_count: usize) -> f32 {
        if !distance_m.is_finite() || distance_m < 0.0 {
            return 0.0;
        }
        let boost = self
            .location
            .distance_bands
            .iter()
            .find(|band| distance_m <= band.max_distance_m)
            .map(|band| band.boost)
            .unwrap_or(0.0);
        let crowding = (nearby_count.max(1) as f32).sqrt();
        (boost / crowding).clamp(0.0, 100.0)
    }

    /// 上限非法（NaN / 越界）时按 [0, 100] 截断
    pub fn blend_confidence(&self, visual: f32, location_boost: f32, use_location: bool) -> f32 {
        let visual = clamp_percent(visual);
        if !use_location {
            return visual.min(clamp_percent_or(self.location.vision_only_cap, 100.0));
        }
        let boost = clamp_percent(location_boost);
        let weight = if self.location.boost_weight.is_finite() {
            self.location.boost_weight.max(0.0)
        } else {
            0.0
        };
        (visual + boost * weight).min(clamp_percent_or(self.location.location_cap, 100.0))
    }
}

fn clamp_percent(v: f32) -> f32 {
    clamp_percent_or(v, 0.0)
}

fn clamp_percent_or(v: f32, fallback: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        fallback
    }
}

pub(crate) fn weights_sum_to_one(weights: &FeatureWeights) -> bool {
    (weights.sum() - 1.0).abs() <= WEIGHT_TOLERANCE
}
