//! 单帧识别流水线
//!
//! 颜色 / 纹理提取 → 地毯可能性门控 → 参考库评分排序。
//! 同一时间只允许一次分析，重入调用直接返回上一次的结果。

use super::color_profile::{ColorConfig, ColorProfile, ColorProfileExtractor};
use super::confidence::ConfidenceConfig;
use super::error::CarpetError;
use super::frame::Frame;
use super::likelihood::{CarpetLikelihoodGate, GateConfig, LikelihoodReport};
use super::reference::ReferenceSet;
use super::scorer::{sort_results, MatchRanker, MatchResult};
use super::state_machine::{AnalysisEvent, AnalysisState, StateAction};
use super::texture::{TextureConfig, TextureFeatureExtractor, TextureFeatures};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

const MAX_POOL_THREADS: usize = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyzerConfig {
    pub color: ColorConfig,
    pub texture: TextureConfig,
    pub gate: GateConfig,
    pub confidence: ConfidenceConfig,
    /// 0 表示 min(CPU 核数, 4)
    pub num_threads: usize,
}

impl AnalyzerConfig {
    /// 低端设备 / 预览流：降低工作分辨率
    pub fn for_fast_preview() -> Self {
        Self {
            color: ColorConfig {
                working_size: 160,
                sample_step: 1,
                ..Default::default()
            },
            texture: TextureConfig {
                working_size: 128,
                block_size: 8,
                ..Default::default()
            },
            num_threads: 2,
            ..Default::default()
        }
    }

    /// 净色 / 弱图案地毯为主的场馆：颜色权重优先
    pub fn for_solid_carpets() -> Self {
        Self {
            confidence: ConfidenceConfig::color_first(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CarpetError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CarpetError> {
        let c = &self.color;
        if c.working_size == 0 || c.top_n == 0 || c.sample_step == 0 {
            return Err(CarpetError::InvalidConfig(
                "color working size, top_n and sample step must be positive".to_string(),
            ));
        }
        if !(1..=256).contains(&c.quantization_levels) {
            return Err(CarpetError::InvalidConfig(format!(
                "quantization levels {} out of range",
                c.quantization_levels
            )));
        }

        let t = &self.texture;
        if t.working_size < 3 || t.block_size == 0 || t.complexity_cap == 0 {
            return Err(CarpetError::InvalidConfig(
                "texture working size must be >= 3, block size and complexity cap positive".to_string(),
            ));
        }

        let g = &self.gate;
        if !(0.0..=1.0).contains(&g.skin_fraction_threshold)
            || !(0.0..=1.0).contains(&g.pass_threshold)
        {
            return Err(CarpetError::InvalidConfig(format!(
                "gate thresholds out of range: skin {} / pass {}",
                g.skin_fraction_threshold, g.pass_threshold
            )));
        }

        self.confidence.validate()
    }

    fn pool_threads(&self) -> usize {
        if self.num_threads > 0 {
            self.num_threads
        } else {
            num_cpus::get().clamp(1, MAX_POOL_THREADS)
        }
    }
}

/// 宿主提供的定位先验：某个参考条目距当前位置的距离
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationHint {
    pub entry_id: String,
    pub distance_m: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStats {
    pub analyzed_frames: u64,
    pub rejected_frames: u64,
    pub matched_frames: u64,
    pub busy_skips: u64,
}

/// 最近一次完成分析的中间结果，供调试浮层使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub frame_number: u64,
    pub color: ColorProfile,
    pub texture: TextureFeatures,
    pub gate: LikelihoodReport,
    pub results: Vec<MatchResult>,
}

#[derive(Default)]
struct Inner {
    state: AnalysisState,
    last_results: Vec<MatchResult>,
    last_diagnostics: Option<DiagnosticSnapshot>,
    stats: AnalysisStats,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 作用域结束时把状态机推回 Idle（正常结束时已是 Idle，此时无操作）
struct BusyGuard<'a> {
    inner: &'a Mutex<Inner>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut inner = lock(self.inner);
        if inner.state.is_busy() {
            warn!("⚠️ Analysis aborted, state released from {:?}", inner.state);
        }
        let (next, _) = inner.state.transition(AnalysisEvent::Finish);
        inner.state = next;
    }
}

struct PipelineOutput {
    color: ColorProfile,
    texture: TextureFeatures,
    gate: LikelihoodReport,
    results: Vec<MatchResult>,
}

/// 按状态机动作提交本帧：Continue 才计入统计，Publish 才更新缓存结果与诊断
fn commit(inner: &mut Inner, frame_number: u64, output: PipelineOutput) -> Vec<MatchResult> {
    let event = if output.gate.passed() {
        AnalysisEvent::Scored {
            candidates: output.results.len(),
        }
    } else {
        AnalysisEvent::GateRejected(output.gate.decision)
    };
    let (next, action) = inner.state.transition(event);
    inner.state = next;
    if action != StateAction::Continue {
        warn!("⚠️ Frame #{} finished outside an analysis cycle, not published", frame_number);
        return output.results;
    }

    inner.stats.analyzed_frames += 1;
    if !output.gate.passed() {
        inner.stats.rejected_frames += 1;
    } else if !output.results.is_empty() {
        inner.stats.matched_frames += 1;
    }

    let (next, action) = inner.state.transition(AnalysisEvent::Finish);
    inner.state = next;
    if action == StateAction::Publish {
        inner.last_results = output.results.clone();
        inner.last_diagnostics = Some(DiagnosticSnapshot {
            frame_number,
            color: output.color,
            texture: output.texture,
            gate: output.gate,
            results: output.results.clone(),
        });
    }

    output.results
}

/// 识别器核心：参考库在构造时注入，之后只读
pub struct CarpetAnalyzer {
    config: AnalyzerConfig,
    references: ReferenceSet,
    color_extractor: ColorProfileExtractor,
    texture_extractor: TextureFeatureExtractor,
    gate: CarpetLikelihoodGate,
    ranker: MatchRanker,
    pool: rayon::ThreadPool,
    inner: Mutex<Inner>,
}

impl CarpetAnalyzer {
    pub fn new(references: ReferenceSet) -> Result<Self, CarpetError> {
        Self::with_config(references, AnalyzerConfig::default())
    }

    pub fn with_config(references: ReferenceSet, config: AnalyzerConfig) -> Result<Self, CarpetError> {
        config.validate()?;

        let threads = config.pool_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("carpet-analyzer-{}", i))
            .build()?;

        info!(
            "🧭 CarpetAnalyzer created: {} references, {} threads",
            references.len(),
            threads
        );

        Ok(Self {
            color_extractor: ColorProfileExtractor::with_config(config.color.clone()),
            texture_extractor: TextureFeatureExtractor::with_config(config.texture.clone()),
            gate: CarpetLikelihoodGate::with_config(config.gate.clone()),
            ranker: MatchRanker::new(config.confidence.clone()),
            config,
            references,
            pool,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    /// 最佳匹配在前；门控拒绝或输入无效时返回空列表，从不报错。
    /// 上一次分析未结束时返回上一次的结果。
    pub fn analyze(&self, frame: &Frame) -> Vec<MatchResult> {
        self.run(frame, None).unwrap_or_else(|_| self.previous_results())
    }

    /// 同 analyze，但上一次分析未结束时返回 Err(Busy)
    pub fn try_analyze(&self, frame: &Frame) -> Result<Vec<MatchResult>, CarpetError> {
        self.run(frame, None)
    }

    /// 视觉结果融合定位先验。有先验的条目走定位上限，其余走纯视觉上限。
    pub fn analyze_with_location(&self, frame: &Frame, hints: &[LocationHint]) -> Vec<MatchResult> {
        self.run(frame, Some(hints)).unwrap_or_else(|_| self.previous_results())
    }

    pub fn last_diagnostics(&self) -> Option<DiagnosticSnapshot> {
        lock(&self.inner).last_diagnostics.clone()
    }

    pub fn stats(&self) -> AnalysisStats {
        lock(&self.inner).stats.clone()
    }

    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.stats = AnalysisStats::default();
        inner.last_results.clear();
        inner.last_diagnostics = None;
        debug!("🔄 CarpetAnalyzer reset");
    }

    fn run(
        &self,
        frame: &Frame,
        hints: Option<&[LocationHint]>,
    ) -> Result<Vec<MatchResult>, CarpetError> {
        {
            let mut inner = lock(&self.inner);
            let (next, action) = inner.state.transition(AnalysisEvent::Start {
                frame_number: frame.frame_number,
            });
            inner.state = next;
            if action != StateAction::Proceed {
                inner.stats.busy_skips += 1;
                debug!("⏳ Frame #{} skipped, analysis in progress", frame.frame_number);
                return Err(CarpetError::Busy);
            }
        }
        let _guard = BusyGuard { inner: &self.inner };

        let output = self.pool.install(|| self.pipeline(frame, hints));
        let results = commit(&mut lock(&self.inner), frame.frame_number, output);
        Ok(results)
    }

    fn previous_results(&self) -> Vec<MatchResult> {
        lock(&self.inner).last_results.clone()
    }

    fn pipeline(&self, frame: &Frame, hints: Option<&[LocationHint]>) -> PipelineOutput {
        let (color, texture) = if let Err(e) = frame.validate() {
            warn!("⚠️ Frame #{} ignored: {}", frame.frame_number, e);
            (ColorProfile::empty(frame.pixel_count()), TextureFeatures::empty())
        } else {
            rayon::join(
                || self.color_extractor.extract(frame),
                || self.texture_extractor.extract(frame),
            )
        };

        let gate = self.gate.evaluate(frame, &color, &texture);
        if !gate.passed() {
            debug!(
                "🚫 Frame #{} rejected by gate: {:?} (score {:.2})",
                frame.frame_number, gate.decision, gate.score
            );
            return PipelineOutput {
                color,
                texture,
                gate,
                results: Vec::new(),
            };
        }

        let top_k = self.config.confidence.top_k.max(1);
        let mut results = match hints {
            None => self.ranker.rank(&color, &texture, self.references.entries()),
            Some(hints) => {
                let all = self.ranker.rank_all(&color, &texture, self.references.entries());
                self.blend_location(all, hints)
            }
        };
        results.truncate(top_k);

        if let Some(best) = results.first() {
            debug!(
                "🎯 Frame #{} best match: {} ({:.1})",
                frame.frame_number, best.entry_id, best.confidence
            );
        }

        PipelineOutput {
            color,
            texture,
            gate,
            results,
        }
    }

    fn blend_location(&self, mut results: Vec<MatchResult>, hints: &[LocationHint]) -> Vec<MatchResult> {
        let confidence = &self.config.confidence;
        let radius = confidence.location.nearby_radius_m;
        let nearby = hints
            .iter()
            .filter(|h| h.distance_m.is_finite() && h.distance_m >= 0.0 && h.distance_m <= radius)
            .count();

        for result in results.iter_mut() {
            match hints.iter().find(|h| h.entry_id == result.entry_id) {
                Some(hint) => {
                    let boost = confidence.location_confidence_boost(hint.distance_m, nearby);
                    result.confidence = confidence.blend_confidence(result.confidence, boost, true);
                    result.reasoning.push(format!(
                        "Location prior: {:.0} m away, {} candidates nearby",
                        hint.distance_m, nearby
                    ));
                }
                None => {
                    result.confidence = confidence.blend_confidence(result.confidence, 0.0, false);
                }
            }
        }

        sort_results(&mut results);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::carpet::likelihood::GateDecision;
    use crate::core::carpet::reference::ReferenceEntry;
    use crate::core::carpet::texture::PatternFamily;

    const TEAL: [u8; 3] = [0, 128, 128];
    const BURGUNDY: [u8; 3] = [128, 0, 32];
    const CREAM: [u8; 3] = [240, 230, 200];

    fn create_solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = (0..width * height)
            .flat_map(|_| [rgb[0], rgb[1], rgb[2], 255])
            .collect();
        Frame::new(width, height, data, 0, 0)
    }

    fn create_carpet_frame(frame_number: u64) -> Frame {
        let palette = [TEAL, BURGUNDY, CREAM];
        let (width, height, tile) = (320u32, 320u32, 8u32);
        let data = (0..width * height)
            .flat_map(|i| {
                let (x, y) = (i % width, i / width);
                let rgb = palette[((x / tile + y / tile) as usize) % palette.len()];
                [rgb[0], rgb[1], rgb[2], 255]
            })
            .collect();
        Frame::new(width, height, data, frame_number * 100, frame_number)
    }

    /// 青色底上大小不一的深红 / 奶油色圆形花纹，相邻块不重复
    fn create_ornamental_frame(size: u32) -> Frame {
        let cell = 12u32;
        let data = (0..size * size)
            .flat_map(|i| {
                let (x, y) = (i % size, i / size);
                let (cx, cy) = (x / cell, y / cell);
                let (lx, ly) = ((x % cell) as i32 - 6, (y % cell) as i32 - 6);
                let radius = 3 + ((cx * 7 + cy * 11) % 5) as i32;
                let rgb = if lx * lx + ly * ly <= radius * radius {
                    if (cx + cy) % 2 == 0 {
                        BURGUNDY
                    } else {
                        CREAM
                    }
                } else {
                    TEAL
                };
                [rgb[0], rgb[1], rgb[2], 255]
            })
            .collect();
        Frame::new(size, size, data, 0, 1)
    }

    fn references() -> ReferenceSet {
        ReferenceSet::from_entries(vec![
            ReferenceEntry::new("a", "Venue A", &[TEAL, BURGUNDY, CREAM], 145.7, "floral/leaf"),
            ReferenceEntry::new(
                "b",
                "Venue B",
                &[[255, 140, 0], [200, 30, 30], [128, 128, 128]],
                167.3,
                "geometric squares",
            ),
        ])
    }

    fn analyzer() -> CarpetAnalyzer {
        CarpetAnalyzer::with_config(
            references(),
            AnalyzerConfig {
                num_threads: 2,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_unchanged_frame_is_deterministic() {
        let analyzer = analyzer();
        let frame = create_carpet_frame(1);

        let first = analyzer.analyze(&frame);
        let second = analyzer.analyze(&frame);

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        // 色板与 A 完全一致
        let a = first.iter().find(|r| r.entry_id == "a").unwrap();
        let b = first.iter().find(|r| r.entry_id == "b").unwrap();
        assert!(a.color_similarity > b.color_similarity);
    }

    #[test]
    fn test_ornamental_frame_ranks_matching_palette_first() {
        let config = AnalyzerConfig {
            color: ColorConfig {
                working_size: 200,
                ..Default::default()
            },
            num_threads: 2,
            ..Default::default()
        };
        let analyzer = CarpetAnalyzer::with_config(references(), config).unwrap();
        let results = analyzer.analyze(&create_ornamental_frame(200));

        let diagnostics = analyzer.last_diagnostics().unwrap();
        assert!(diagnostics.gate.passed());
        assert_eq!(diagnostics.texture.pattern, PatternFamily::Ornamental);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry_id, "a");
        assert_eq!(results[1].entry_id, "b");
        assert!(results[0].confidence > results[1].confidence);
        assert!(results[0].color_similarity > results[1].color_similarity);
    }

    #[test]
    fn test_empty_frame_yields_no_matches() {
        let analyzer = analyzer();
        let results = analyzer.analyze(&Frame::new(0, 0, vec![], 0, 3));
        assert!(results.is_empty());

        let stats = analyzer.stats();
        assert_eq!(stats.analyzed_frames, 1);
        assert_eq!(stats.rejected_frames, 1);
        let diagnostics = analyzer.last_diagnostics().unwrap();
        assert_eq!(diagnostics.gate.decision, GateDecision::EmptyFrame);
        assert_eq!(diagnostics.frame_number, 3);
    }

    #[test]
    fn test_truncated_buffer_yields_no_matches() {
        let analyzer = analyzer();
        assert!(analyzer.analyze(&Frame::new(10, 10, vec![0; 12], 0, 0)).is_empty());
    }

    #[test]
    fn test_skin_frame_rejected() {
        let analyzer = analyzer();
        assert!(analyzer.analyze(&create_solid_frame(320, 240, [224, 172, 140])).is_empty());
        assert_eq!(
            analyzer.last_diagnostics().unwrap().gate.decision,
            GateDecision::SkinTone
        );
    }

    #[test]
    fn test_empty_reference_set() {
        let analyzer = CarpetAnalyzer::new(ReferenceSet::default()).unwrap();
        let results = analyzer.analyze(&create_carpet_frame(1));
        assert!(results.is_empty());

        let diagnostics = analyzer.last_diagnostics().unwrap();
        assert!(diagnostics.gate.passed());
        assert_eq!(analyzer.stats().matched_frames, 0);
    }

    #[test]
    fn test_busy_returns_previous_results() {
        let analyzer = analyzer();
        let previous = analyzer.analyze(&create_carpet_frame(1));
        assert!(!previous.is_empty());

        {
            let mut inner = lock(&analyzer.inner);
            inner.state = AnalysisState::Analyzing { frame_number: 99 };
        }
        let frame = create_solid_frame(320, 240, [224, 172, 140]);
        assert_eq!(analyzer.analyze(&frame), previous);
        assert!(matches!(analyzer.try_analyze(&frame), Err(CarpetError::Busy)));
        assert_eq!(analyzer.stats().busy_skips, 2);
        assert_eq!(analyzer.stats().analyzed_frames, 1);
        assert_eq!(analyzer.last_diagnostics().unwrap().frame_number, 1);
    }

    fn passed_output() -> PipelineOutput {
        PipelineOutput {
            color: ColorProfile::empty(0),
            texture: TextureFeatures::empty(),
            gate: LikelihoodReport {
                skin_fraction: 0.0,
                color_plausibility: 1.0,
                texture_plausibility: 1.0,
                statistical_plausibility: 1.0,
                score: 1.0,
                decision: GateDecision::Pass,
            },
            results: Vec::new(),
        }
    }

    #[test]
    fn test_commit_publishes_only_inside_cycle() {
        let mut inner = Inner::default();
        commit(&mut inner, 5, passed_output());
        assert_eq!(inner.state, AnalysisState::Idle);
        assert_eq!(inner.stats, AnalysisStats::default());
        assert!(inner.last_diagnostics.is_none());

        inner.state = AnalysisState::Analyzing { frame_number: 5 };
        commit(&mut inner, 5, passed_output());
        assert_eq!(inner.state, AnalysisState::Idle);
        assert_eq!(inner.stats.analyzed_frames, 1);
        assert_eq!(inner.last_diagnostics.as_ref().map(|d| d.frame_number), Some(5));
    }

    #[test]
    fn test_try_analyze_when_idle() {
        let analyzer = analyzer();
        let results = analyzer.try_analyze(&create_carpet_frame(1)).unwrap();
        assert_eq!(results, analyzer.last_diagnostics().unwrap().results);
    }

    #[test]
    fn test_stats_and_reset() {
        let analyzer = analyzer();
        analyzer.analyze(&create_carpet_frame(1));
        analyzer.analyze(&create_solid_frame(320, 240, [224, 172, 140]));

        let stats = analyzer.stats();
        assert_eq!(stats.analyzed_frames, 2);
        assert_eq!(stats.matched_frames, 1);
        assert_eq!(stats.rejected_frames, 1);

        analyzer.reset();
        assert_eq!(analyzer.stats(), AnalysisStats::default());
        assert!(analyzer.last_diagnostics().is_none());
    }

    #[test]
    fn test_location_blending_caps() {
        let analyzer = analyzer();
        let frame = create_carpet_frame(1);
        let visual = analyzer.analyze(&frame);
        let hints = vec![LocationHint {
            entry_id: "b".to_string(),
            distance_m: 10.0,
        }];
        let blended = analyzer.analyze_with_location(&frame, &hints);
        assert_eq!(blended.len(), visual.len());

        let find = |list: &[MatchResult], id: &str| {
            list.iter().find(|r| r.entry_id == id).map(|r| r.confidence).unwrap()
        };
        // 无定位先验：纯视觉上限
        assert!((find(&blended, "a") - find(&visual, "a").min(85.0)).abs() < 1e-4);
        // 10 m 内唯一候选：+20，上限 98
        assert!((find(&blended, "b") - (find(&visual, "b") + 20.0).min(98.0)).abs() < 1e-3);
        assert!(blended.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_config_from_json() {
        let config = AnalyzerConfig::from_json(r#"{ "numThreads": 2, "confidence": { "topK": 1 } }"#).unwrap();
        assert_eq!(config.num_threads, 2);
        assert_eq!(config.confidence.top_k, 1);
        assert_eq!(config.color.top_n, 8);

        let analyzer = CarpetAnalyzer::with_config(references(), config).unwrap();
        assert_eq!(analyzer.analyze(&create_carpet_frame(1)).len(), 1);

        assert!(AnalyzerConfig::from_json(r#"{ "color": { "quantizationLevels": 0 } }"#).is_err());
        assert!(AnalyzerConfig::from_json(r#"{ "gate": { "passThreshold": 2.0 } }"#).is_err());
        assert!(AnalyzerConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_presets_validate() {
        assert!(AnalyzerConfig::default().validate().is_ok());
        assert!(AnalyzerConfig::for_fast_preview().validate().is_ok());
        let strict = AnalyzerConfig {
            gate: GateConfig::strict(),
            ..Default::default()
        };
        assert!(strict.validate().is_ok());

        let solid = AnalyzerConfig::for_solid_carpets();
        assert!(solid.validate().is_ok());
        assert!(solid.confidence.base_weights.color > AnalyzerConfig::default().confidence.base_weights.color);
    }
}
