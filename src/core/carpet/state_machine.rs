use super::likelihood::GateDecision;

/// 单帧分析周期：Idle → Analyzing → Rejected | Scored → Idle
///
/// 不携带跨帧状态，“连续 N 帧命中”之类的确认策略由宿主负责。
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisState {
    Idle,
    Analyzing { frame_number: u64 },
    Rejected { frame_number: u64, reason: GateDecision },
    Scored { frame_number: u64, candidates: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalysisEvent {
    Start { frame_number: u64 },
    GateRejected(GateDecision),
    Scored { candidates: usize },
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateAction {
    /// 开始处理这一帧
    Proceed,
    /// 上一次分析还没结束，直接返回上次结果
    ReturnPrevious,
    /// 本帧进入结束状态
    Continue,
    /// 发布本帧结果
    Publish,
    Ignore,
}

impl AnalysisState {
    pub fn new() -> Self {
        AnalysisState::Idle
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, AnalysisState::Analyzing { .. })
    }

    pub fn transition(&self, event: AnalysisEvent) -> (AnalysisState, StateAction) {
        match (self, event) {
            (AnalysisState::Analyzing { .. }, AnalysisEvent::Start { .. }) => {
                (self.clone(), StateAction::ReturnPrevious)
            }
            (_, AnalysisEvent::Start { frame_number }) => {
                (AnalysisState::Analyzing { frame_number }, StateAction::Proceed)
            }

            (AnalysisState::Analyzing { frame_number }, AnalysisEvent::GateRejected(reason)) => (
                AnalysisState::Rejected {
                    frame_number: *frame_number,
                    reason,
                },
                StateAction::Continue,
            ),
            (AnalysisState::Analyzing { frame_number }, AnalysisEvent::Scored { candidates }) => (
                AnalysisState::Scored {
                    frame_number: *frame_number,
                    candidates,
                },
                StateAction::Continue,
            ),

            (AnalysisState::Rejected { .. }, AnalysisEvent::Finish)
            | (AnalysisState::Scored { .. }, AnalysisEvent::Finish) => {
                (AnalysisState::Idle, StateAction::Publish)
            }
            // 中途退出（例如 panic 展开）直接回到 Idle，不发布
            (AnalysisState::Analyzing { .. }, AnalysisEvent::Finish) => {
                (AnalysisState::Idle, StateAction::Ignore)
            }

            _ => (self.clone(), StateAction::Ignore),
        }
    }
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self::new()
    }
}
