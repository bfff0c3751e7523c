//! 매칭 결과 모델.

use std::time::Duration;

/// 약한 매칭 템플릿 이름 접두사
pub const WEAK_MATCH_PREFIX: &str = "weak_";

/// 매칭 강도
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// 점수 ≥ θ
    Strong,
    /// θ - weakOffset ≤ 점수 < θ
    Weak,
}

/// 프레임당 최대 하나 생성되는 매칭 결과
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// 템플릿 이름 (약한 매칭이면 `weak_` 접두사)
    pub template_name: String,
    /// 유사도 점수
    pub score: f32,
    /// 최고 점수를 얻은 스케일
    pub scale: f32,
    /// 최고 점수 위치 (축소된 템플릿의 좌상단)
    pub location: (u32, u32),
    /// 검색 소요 시간
    pub elapsed: Duration,
    /// 매칭 강도
    pub kind: MatchKind,
}

impl MatchResult {
    /// 약한 매칭 여부
    pub fn is_weak(&self) -> bool {
        self.kind == MatchKind::Weak
    }

    /// 강도에 맞는 라벨 생성
    pub fn label_for(name: &str, kind: MatchKind) -> String {
        match kind {
            MatchKind::Strong => name.to_string(),
            MatchKind::Weak => format!("{WEAK_MATCH_PREFIX}{name}"),
        }
    }
}
