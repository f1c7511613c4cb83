//! 多维相似度评分与排序
//!
//! 对每个参考条目独立计算颜色 / 图案 / 纹理三项相似度，按动态权重合成置信度，
//! 排序后截断到 top-K。

use super::color_profile::{weighted_distance, ColorProfile, ColorSignature, DominantColor};
use super::confidence::{weights_sum_to_one, ConfidenceConfig, FeatureWeights};
use super::error::CarpetError;
use super::reference::ReferenceEntry;
use super::texture::{PatternFamily, TextureFeatures};
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const SNAPSHOT_COLORS: usize = 3;

/// 结果里附带的特征快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFeatures {
    pub dominant_colors: Vec<DominantColor>,
    pub brightness_variance: f32,
    pub mean_saturation: f32,
    pub contrast: f32,
    pub edge_density: f32,
    pub repetition_score: f32,
    pub color_complexity: f32,
    pub pattern: PatternFamily,
}

impl DetectedFeatures {
    pub fn from_features(color: &ColorProfile, texture: &TextureFeatures) -> Self {
        Self {
            dominant_colors: color.dominant_colors.iter().take(SNAPSHOT_COLORS).copied().collect(),
            brightness_variance: color.brightness_variance,
            mean_saturation: color.mean_saturation,
            contrast: texture.contrast,
            edge_density: texture.edge_density,
            repetition_score: texture.repetition_score,
            color_complexity: texture.color_complexity,
            pattern: texture.pattern,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub entry_id: String,
    pub display_name: String,
    /// 0-100
    pub confidence: f32,
    /// 0-100
    pub color_similarity: f32,
    /// 0-100
    pub pattern_similarity: f32,
    /// 0-100
    pub texture_similarity: f32,
    pub reasoning: Vec<String>,
    pub detected_features: DetectedFeatures,
}

pub struct SimilarityScorer {
    config: ConfidenceConfig,
}

impl SimilarityScorer {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    /// 每个采集主色在参考主色中找最佳匹配后取平均，再混入方差接近度。
    /// 任一侧没有主色时为 0。
    pub fn color_similarity(&self, captured: &ColorSignature, reference: &ColorSignature) -> f32 {
        let k = self.config.color_compare_k.max(1);
        let ours = &captured.dominant_colors[..captured.dominant_colors.len().min(k)];
        let theirs = &reference.dominant_colors[..reference.dominant_colors.len().min(k)];
        if ours.is_empty() || theirs.is_empty() {
            return 0.0;
        }

        let scale = self.config.color_distance_scale.max(f32::EPSILON);
        let palette_match = ours
            .iter()
            .map(|c| {
                theirs
                    .iter()
                    .map(|r| 1.0 - (weighted_distance(c.rgb, r.rgb) / scale).min(1.0))
                    .fold(0.0f32, f32::max)
            })
            .sum::<f32>()
            / ours.len() as f32;

        let clean = |v: f32| if v.is_finite() { v.max(0.0) } else { 0.0 };
        let (va, vb) = (clean(captured.variance), clean(reference.variance));
        let larger = va.max(vb);
        let variance_proximity = if larger <= f32::EPSILON {
            1.0
        } else {
            1.0 - (va - vb).abs() / larger
        };

        let blend = self.config.variance_blend.clamp(0.0, 1.0);
        ((1.0 - blend) * palette_match + blend * variance_proximity).clamp(0.0, 1.0)
    }

    /// 查表得分 + 纹理特征符合参考图案族预期时的一致性加分
    pub fn pattern_similarity(&self, texture: &TextureFeatures, reference: PatternFamily) -> f32 {
        let table = &self.config.pattern_scores;
        let base = self.config.pattern_match_score(texture.pattern, reference);

        let consistent = match reference {
            PatternFamily::Geometric => {
                texture.repetition_score >= table.high_repetition
                    && texture.edge_density >= table.high_edge_density
            }
            PatternFamily::Ornamental => texture.repetition_score < table.high_repetition,
            PatternFamily::Plain => {
                texture.edge_density < table.low_edge_density
                    && texture.repetition_score >= table.high_repetition
            }
            PatternFamily::Mixed => false,
        };

        let bonus = if consistent { table.consistency_bonus } else { 0.0 };
        (base + bonus).clamp(0.0, 1.0)
    }

    /// 参考方差决定预期纹理强度区间，落在区间内为 1，偏离越远越低
    pub fn texture_similarity(&self, texture: &TextureFeatures, reference_variance: f32) -> f32 {
        let bands = &self.config.texture_bands;
        let expected = bands.expected_band(reference_variance);
        let level = bands.texture_level(texture.contrast, texture.edge_density);
        let falloff = bands.falloff.max(f32::EPSILON);
        (1.0 - expected.distance(level) / falloff).clamp(0.0, 1.0)
    }

    pub fn score_entry(
        &self,
        color: &ColorProfile,
        captured: &ColorSignature,
        texture: &TextureFeatures,
        weights: &FeatureWeights,
        entry: &ReferenceEntry,
    ) -> Result<MatchResult, CarpetError> {
        entry.validate()?;

        let color_sim = self.color_similarity(captured, &entry.color_profile);
        let pattern_sim = self.pattern_similarity(texture, entry.pattern_family());
        let texture_sim = self.texture_similarity(texture, entry.color_profile.variance);

        let visual = (weights.color * color_sim
            + weights.pattern * pattern_sim
            + weights.texture * texture_sim)
            * 100.0;
        let confidence = (visual + self.config.color_match_bonus(color_sim)).clamp(0.0, 100.0);

        Ok(MatchResult {
            entry_id: entry.id.clone(),
            display_name: entry.display_name.clone(),
            confidence,
            color_similarity: color_sim * 100.0,
            pattern_similarity: pattern_sim * 100.0,
            texture_similarity: texture_sim * 100.0,
            reasoning: self.reasoning(color_sim, pattern_sim, texture_sim, texture, entry),
            detected_features: DetectedFeatures::from_features(color, texture),
        })
    }

    fn reasoning(
        &self,
        color_sim: f32,
        pattern_sim: f32,
        texture_sim: f32,
        texture: &TextureFeatures,
        entry: &ReferenceEntry,
    ) -> Vec<String> {
        let mut reasons = vec![
            format!(
                "{} color match ({:.0}%)",
                capitalize(self.config.similarity_level(color_sim).label()),
                color_sim * 100.0
            ),
            format!(
                "{} pattern match: {} vs {} ({:.0}%)",
                capitalize(self.config.similarity_level(pattern_sim).label()),
                texture.pattern.as_str(),
                entry.pattern_family().as_str(),
                pattern_sim * 100.0
            ),
            format!(
                "{} texture match ({:.0}%)",
                capitalize(self.config.similarity_level(texture_sim).label()),
                texture_sim * 100.0
            ),
        ];

        reasons.push(
            match texture.pattern {
                PatternFamily::Geometric => "geometric pattern detected",
                PatternFamily::Ornamental => "ornamental pattern detected",
                PatternFamily::Plain => "plain surface detected",
                PatternFamily::Mixed => "mixed pattern detected",
            }
            .to_string(),
        );
        if texture.repetition_score >= 0.7 {
            reasons.push("highly repetitive design".to_string());
        }
        if texture.contrast >= 0.35 {
            reasons.push("high-contrast texture".to_string());
        }
        if texture.color_complexity >= 0.6 {
            reasons.push("rich color palette".to_string());
        }
        reasons
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct MatchRanker {
    scorer: SimilarityScorer,
}

impl MatchRanker {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self {
            scorer: SimilarityScorer::new(config),
        }
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    /// 结果按置信度降序（同分按 id），最多 top_k 个；无效条目跳过
    pub fn rank(
        &self,
        color: &ColorProfile,
        texture: &TextureFeatures,
        references: &[ReferenceEntry],
    ) -> Vec<MatchResult> {
        let mut results = self.rank_all(color, texture, references);
        results.truncate(self.scorer.config().top_k.max(1));
        results
    }

    /// 不截断的完整排序
    pub fn rank_all(
        &self,
        color: &ColorProfile,
        texture: &TextureFeatures,
        references: &[ReferenceEntry],
    ) -> Vec<MatchResult> {
        if references.is_empty() {
            return Vec::new();
        }

        let config = self.scorer.config();
        let signals = config.weight_signals(color, texture);
        let weights = config.dynamic_weights(&signals);
        debug_assert!(weights_sum_to_one(&weights));
        debug!(
            "⚖️ Weights: color={:.3} pattern={:.3} texture={:.3}",
            weights.color, weights.pattern, weights.texture
        );

        let captured = color.signature();
        let mut results: Vec<MatchResult> = references
            .par_iter()
            .filter_map(|entry| {
                match self.scorer.score_entry(color, &captured, texture, &weights, entry) {
                    Ok(result) => Some(result),
                    Err(e) => {
                        warn!("⚠️ Skipping reference during scoring: {}", e);
                        None
                    }
                }
            })
            .collect();

        sort_results(&mut results);
        results
    }
}

pub(crate) fn sort_results(results: &mut [MatchResult]) {
    results.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.entry_id.cmp(&b.entry_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEAL: [u8; 3] = [0, 128, 128];
    const BURGUNDY: [u8; 3] = [128, 0, 32];
    const CREAM: [u8; 3] = [240, 230, 200];

    fn entry_a() -> ReferenceEntry {
        ReferenceEntry::new("a", "Venue A", &[TEAL, BURGUNDY, CREAM], 145.7, "floral/leaf")
    }

    fn entry_b() -> ReferenceEntry {
        ReferenceEntry::new("b", "Venue B", &[[255, 140, 0], [200, 30, 30], [128, 128, 128]], 167.3, "geometric squares")
    }

    fn profile(colors: &[([u8; 3], f32)], variance: f32, saturation: f32) -> ColorProfile {
        ColorProfile {
            dominant_colors: colors
                .iter()
                .map(|&(rgb, frequency)| DominantColor { rgb, frequency })
                .collect(),
            brightness_variance: variance,
            contrast_ratio: 3.0,
            mean_saturation: saturation,
            brightness_histogram: vec![0; 256],
            sampled_pixels: 8000,
            total_pixels: 102_400,
        }
    }

    fn ornamental_texture() -> TextureFeatures {
        TextureFeatures {
            contrast: 0.35,
            edge_density: 12.0,
            repetition_score: 0.3,
            color_complexity: 0.3,
            pattern: PatternFamily::Ornamental,
        }
    }

    fn pseudo_random_signature(seed: u32) -> ColorSignature {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        let count = (next() % 8) as usize;
        ColorSignature {
            dominant_colors: (0..count)
                .map(|_| DominantColor {
                    rgb: [next() as u8, next() as u8, next() as u8],
                    frequency: (next() % 100) as f32 / 100.0,
                })
                .collect(),
            variance: (next() % 4000) as f32,
        }
    }

    #[test]
    fn test_color_similarity_identity() {
        let scorer = SimilarityScorer::new(ConfidenceConfig::default());
        for seed in 0..50 {
            let sig = pseudo_random_signature(seed);
            if sig.dominant_colors.is_empty() {
                continue;
            }
            let sim = scorer.color_similarity(&sig, &sig);
            assert!((sim - 1.0).abs() < 1e-5, "seed {} -> {}", seed, sim);
        }
    }

    #[test]
    fn test_color_similarity_bounded() {
        let scorer = SimilarityScorer::new(ConfidenceConfig::default());
        for a in 0..30 {
            for b in 0..30 {
                let sim = scorer.color_similarity(&pseudo_random_signature(a), &pseudo_random_signature(b + 100));
                assert!((0.0..=1.0).contains(&sim));
            }
        }
    }

    #[test]
    fn test_zero_profile_similarity_is_zero() {
        let scorer = SimilarityScorer::new(ConfidenceConfig::default());
        let empty = ColorProfile::empty(0).signature();
        let a = entry_a().color_profile;
        assert_eq!(scorer.color_similarity(&empty, &a), 0.0);
        assert_eq!(scorer.color_similarity(&a, &empty), 0.0);
        assert_eq!(scorer.color_similarity(&empty, &empty), 0.0);
    }

    #[test]
    fn test_scenario_ornamental_teal_frame_prefers_a() {
        let ranker = MatchRanker::new(ConfidenceConfig::default());
        let color = profile(
            &[([8, 136, 136], 0.34), ([136, 8, 40], 0.33), ([248, 232, 200], 0.33)],
            140.0,
            0.6,
        );
        let texture = ornamental_texture();

        let results = ranker.rank(&color, &texture, &[entry_b(), entry_a()]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry_id, "a");
        assert_eq!(results[1].entry_id, "b");
        assert!(results[0].confidence > results[1].confidence);
        assert!(results[0].color_similarity > results[1].color_similarity);
        assert!(results[0]
            .reasoning
            .iter()
            .any(|r| r == "ornamental pattern detected"));
        assert_eq!(results[0].detected_features.pattern, PatternFamily::Ornamental);
    }

    #[test]
    fn test_rank_sorted_and_truncated() {
        let config = ConfidenceConfig::default();
        let top_k = config.top_k;
        let ranker = MatchRanker::new(config);
        let references: Vec<ReferenceEntry> = (0..12)
            .map(|i| {
                let sig = pseudo_random_signature(i + 1);
                let colors: Vec<[u8; 3]> = sig.dominant_colors.iter().map(|c| c.rgb).collect();
                let colors = if colors.is_empty() { vec![[i as u8 * 20, 90, 40]] } else { colors };
                let pattern = ["plain", "floral", "stripes", "abstract"][i as usize % 4];
                ReferenceEntry::new(format!("venue-{}", i), format!("Venue {}", i), &colors, sig.variance, pattern)
            })
            .collect();

        let color = profile(&[([8, 136, 136], 0.5), ([136, 8, 40], 0.5)], 300.0, 0.4);
        let results = ranker.rank(&color, &ornamental_texture(), &references);

        assert_eq!(results.len(), top_k);
        assert!(results.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        for r in &results {
            assert!((0.0..=100.0).contains(&r.confidence));
            assert!((0.0..=100.0).contains(&r.color_similarity));
            assert!((0.0..=100.0).contains(&r.pattern_similarity));
            assert!((0.0..=100.0).contains(&r.texture_similarity));
        }
    }

    #[test]
    fn test_rank_empty_references() {
        let ranker = MatchRanker::new(ConfidenceConfig::default());
        let color = profile(&[(TEAL, 1.0)], 100.0, 0.5);
        assert!(ranker.rank(&color, &ornamental_texture(), &[]).is_empty());
    }

    #[test]
    fn test_malformed_entry_skipped() {
        let ranker = MatchRanker::new(ConfidenceConfig::default());
        let broken = ReferenceEntry::new("broken", "Broken", &[], 10.0, "plain");
        let color = profile(&[(TEAL, 1.0)], 100.0, 0.5);

        let results = ranker.rank(&color, &ornamental_texture(), &[broken, entry_a()]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry_id, "a");
    }

    #[test]
    fn test_pattern_consistency_bonus() {
        let scorer = SimilarityScorer::new(ConfidenceConfig::default());
        let mixed_repetitive = TextureFeatures {
            contrast: 0.3,
            edge_density: 20.0,
            repetition_score: 0.8,
            color_complexity: 0.2,
            pattern: PatternFamily::Mixed,
        };
        // close 0.75 + 一致性加分
        assert!((scorer.pattern_similarity(&mixed_repetitive, PatternFamily::Geometric) - 0.85).abs() < 1e-6);
        assert!((scorer.pattern_similarity(&mixed_repetitive, PatternFamily::Ornamental) - 0.75).abs() < 1e-6);
        assert_eq!(scorer.pattern_similarity(&ornamental_texture(), PatternFamily::Ornamental), 1.0);
    }

    #[test]
    fn test_texture_similarity_follows_reference_variance() {
        let scorer = SimilarityScorer::new(ConfidenceConfig::default());
        let flat = TextureFeatures {
            contrast: 0.02,
            edge_density: 0.5,
            repetition_score: 0.95,
            color_complexity: 0.05,
            pattern: PatternFamily::Plain,
        };
        let busy = TextureFeatures {
            contrast: 0.6,
            edge_density: 40.0,
            repetition_score: 0.4,
            color_complexity: 0.7,
            pattern: PatternFamily::Ornamental,
        };

        assert_eq!(scorer.texture_similarity(&flat, 20.0), 1.0);
        assert_eq!(scorer.texture_similarity(&busy, 400.0), 1.0);
        assert!(scorer.texture_similarity(&flat, 400.0) < 0.1);
        assert!(scorer.texture_similarity(&busy, 20.0) < 0.1);
    }

    #[test]
    fn test_rank_is_deterministic() {
        let ranker = MatchRanker::new(ConfidenceConfig::default());
        let color = profile(&[(TEAL, 0.6), (CREAM, 0.4)], 120.0, 0.5);
        let refs = [entry_a(), entry_b()];
        let first = ranker.rank(&color, &ornamental_texture(), &refs);
        for _ in 0..5 {
            assert_eq!(ranker.rank(&color, &ornamental_texture(), &refs), first);
        }
    }
}
