//! 参考地毯库（离线生成，进程内只读）

use super::color_profile::{ColorSignature, DominantColor};
use super::error::CarpetError;
use super::texture::PatternFamily;
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 图案描述 → 图案族，显式映射，不做子串猜测
static DESCRIPTOR_TABLE: Lazy<HashMap<&'static str, PatternFamily>> = Lazy::new(|| {
    use PatternFamily::*;
    [
        ("geometric", Geometric),
        ("geometric squares", Geometric),
        ("squares", Geometric),
        ("grid", Geometric),
        ("checkered", Geometric),
        ("checkerboard", Geometric),
        ("stripes", Geometric),
        ("striped", Geometric),
        ("diamonds", Geometric),
        ("hexagon", Geometric),
        ("hexagonal", Geometric),
        ("tartan", Geometric),
        ("plaid", Geometric),
        ("lattice", Geometric),
        ("ornamental", Ornamental),
        ("floral", Ornamental),
        ("floral/leaf", Ornamental),
        ("leaf", Ornamental),
        ("paisley", Ornamental),
        ("damask", Ornamental),
        ("baroque", Ornamental),
        ("scrollwork", Ornamental),
        ("medallion", Ornamental),
        ("swirl", Ornamental),
        ("plain", Plain),
        ("solid", Plain),
        ("uniform", Plain),
        ("mixed", Mixed),
        ("abstract", Mixed),
        ("speckled", Mixed),
        ("flecked", Mixed),
    ]
    .into_iter()
    .collect()
});

fn normalize_descriptor(descriptor: &str) -> String {
    descriptor
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" / ", "/")
        .to_lowercase()
}

/// 参考条目的图案标签，未知描述回落到 Mixed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PatternDescriptor {
    raw: String,
    family: PatternFamily,
    recognized: bool,
}

impl PatternDescriptor {
    pub fn family(&self) -> PatternFamily {
        self.family
    }

    pub fn is_recognized(&self) -> bool {
        self.recognized
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl From<String> for PatternDescriptor {
    fn from(raw: String) -> Self {
        let mapped = DESCRIPTOR_TABLE.get(normalize_descriptor(&raw).as_str()).copied();
        Self {
            raw,
            family: mapped.unwrap_or(PatternFamily::Mixed),
            recognized: mapped.is_some(),
        }
    }
}

impl From<&str> for PatternDescriptor {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<PatternDescriptor> for String {
    fn from(descriptor: PatternDescriptor) -> Self {
        descriptor.raw
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntry {
    pub id: String,
    pub display_name: String,
    pub color_profile: ColorSignature,
    pub pattern: PatternDescriptor,
}

impl ReferenceEntry {
    /// 主色按给定顺序、等频率构造
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        colors: &[[u8; 3]],
        variance: f32,
        pattern: impl Into<PatternDescriptor>,
    ) -> Self {
        let frequency = if colors.is_empty() {
            0.0
        } else {
            1.0 / colors.len() as f32
        };
        Self {
            id: id.into(),
            display_name: display_name.into(),
            color_profile: ColorSignature {
                dominant_colors: colors
                    .iter()
                    .map(|&rgb| DominantColor { rgb, frequency })
                    .collect(),
                variance,
            },
            pattern: pattern.into(),
        }
    }

    pub fn pattern_family(&self) -> PatternFamily {
        self.pattern.family()
    }

    pub fn validate(&self) -> Result<(), CarpetError> {
        if self.id.trim().is_empty() {
            return Err(CarpetError::InvalidReference("empty id".to_string()));
        }
        if self.color_profile.dominant_colors.is_empty() {
            return Err(CarpetError::InvalidReference(format!(
                "{}: no dominant colors",
                self.id
            )));
        }
        let variance = self.color_profile.variance;
        if !variance.is_finite() || variance < 0.0 {
            return Err(CarpetError::InvalidReference(format!(
                "{}: invalid variance {}",
                self.id, variance
            )));
        }
        if self
            .color_profile
            .dominant_colors
            .iter()
            .any(|c| !c.frequency.is_finite() || c.frequency < 0.0)
        {
            return Err(CarpetError::InvalidReference(format!(
                "{}: invalid color frequency",
                self.id
            )));
        }
        Ok(())
    }
}

/// 注入给分析器的只读参考表
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    entries: Arc<[ReferenceEntry]>,
}

impl Default for ReferenceSet {
    fn default() -> Self {
        Self {
            entries: Arc::from(Vec::new()),
        }
    }
}

impl ReferenceSet {
    /// 校验每个条目，跳过无效条目
    pub fn from_entries(entries: Vec<ReferenceEntry>) -> Self {
        let total = entries.len();
        let valid: Vec<ReferenceEntry> = entries
            .into_iter()
            .filter(|entry| match entry.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("⚠️ Skipping reference entry: {}", e);
                    false
                }
            })
            .collect();

        for entry in valid.iter().filter(|e| !e.pattern.is_recognized()) {
            warn!(
                "⚠️ Reference {}: unknown pattern descriptor {:?}, treating as mixed",
                entry.id,
                entry.pattern.as_str()
            );
        }

        info!("📚 Reference set loaded: {}/{} entries", valid.len(), total);
        Self {
            entries: valid.into(),
        }
    }

    /// JSON 数组，单个条目结构错误时跳过，整体格式错误返回 Err
    pub fn from_json(json: &str) -> Result<Self, CarpetError> {
        let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let entries = raw
            .into_iter()
            .enumerate()
            .filter_map(|(i, value)| match serde_json::from_value::<ReferenceEntry>(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("⚠️ Skipping malformed reference #{}: {}", i, e);
                    None
                }
            })
            .collect();
        Ok(Self::from_entries(entries))
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ReferenceEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}
