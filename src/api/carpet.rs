//! 地毯识别器

use crate::core::carpet::{
    AnalysisStats, AnalyzerConfig, CarpetAnalyzer, CarpetError, DiagnosticSnapshot, Frame,
    LocationHint, MatchResult, RawFrame, ReferenceSet,
};
use flutter_rust_bridge::frb;
use log::{info, warn};

/// 地毯识别器 - 颜色 / 纹理特征 + 参考库匹配
///
/// ```dart
/// final recognizer = CarpetRecognizer.create(referencesJson: json);
/// final matches = await recognizer.analyzeYuv(frame: rawFrame);
/// final stats = recognizer.stats;
/// ```
#[frb(opaque)]
pub struct CarpetRecognizer {
    analyzer: CarpetAnalyzer,
}

impl CarpetRecognizer {
    /// 使用默认参数创建
    #[frb(sync)]
    pub fn create(references_json: String) -> Result<Self, CarpetError> {
        Self::create_with_config(references_json, None)
    }

    /// config_json 为 AnalyzerConfig 的 JSON，缺省字段取默认值
    #[frb(sync)]
    pub fn create_with_config(
        references_json: String,
        config_json: Option<String>,
    ) -> Result<Self, CarpetError> {
        crate::init_logging();

        let references = ReferenceSet::from_json(&references_json)?;
        let config = match config_json {
            Some(json) => AnalyzerConfig::from_json(&json)?,
            None => AnalyzerConfig::default(),
        };
        let analyzer = CarpetAnalyzer::with_config(references, config)?;

        info!(
            "🧶 CarpetRecognizer: created with {} references",
            analyzer.references().len()
        );
        Ok(Self { analyzer })
    }

    /// 分析一帧 RGBA 图像
    #[frb]
    pub fn analyze_rgba(
        &self,
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Vec<MatchResult> {
        let frame = Frame::new(width, height, data, timestamp_ms, frame_number);
        self.analyzer.analyze(&frame)
    }

    /// 同 analyze_rgba，上一次分析未结束时返回 Busy
    #[frb]
    pub fn try_analyze_rgba(
        &self,
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Result<Vec<MatchResult>, CarpetError> {
        let frame = Frame::new(width, height, data, timestamp_ms, frame_number);
        self.analyzer.try_analyze(&frame)
    }

    /// 分析一帧相机 I420 数据
    #[frb]
    pub fn analyze_yuv(&self, frame: RawFrame) -> Vec<MatchResult> {
        match frame.to_rgba() {
            Ok(rgba) => self.analyzer.analyze(&rgba),
            Err(e) => {
                warn!("⚠️ CarpetRecognizer: dropping frame #{}: {}", frame.frame_number, e);
                Vec::new()
            }
        }
    }

    /// 分析一帧 RGBA 图像并融合定位先验
    #[frb]
    pub fn analyze_rgba_with_location(
        &self,
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
        hints: Vec<LocationHint>,
    ) -> Vec<MatchResult> {
        let frame = Frame::new(width, height, data, timestamp_ms, frame_number);
        self.analyzer.analyze_with_location(&frame, &hints)
    }

    /// 最近一次分析的中间特征（调试浮层）
    #[frb(sync)]
    pub fn last_diagnostics(&self) -> Option<DiagnosticSnapshot> {
        self.analyzer.last_diagnostics()
    }

    #[frb(sync, getter)]
    pub fn reference_count(&self) -> usize {
        self.analyzer.references().len()
    }

    /// 获取分析统计
    #[frb(sync, getter)]
    pub fn stats(&self) -> AnalysisStats {
        self.analyzer.stats()
    }

    /// 重置统计与缓存结果
    #[frb(sync)]
    pub fn reset(&self) {
        self.analyzer.reset()
    }
}

impl Drop for CarpetRecognizer {
    fn drop(&mut self) {
        info!("🗑️ CarpetRecognizer: released");
    }
}
