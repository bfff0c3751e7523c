//! 템플릿 + 템플릿 집합 모델.
//!
//! 템플릿은 로드 후 불변이다. 활성 집합은 통째로 교체되며 제자리 수정되지 않는다.

use image::GrayImage;

/// 템플릿 최장 변 상한 (픽셀). 더 긴 템플릿은 로드 시 한 번 축소된다.
pub const TEMPLATE_MAX_EDGE: u32 = 400;

/// 이름 + 그레이스케일 래스터
#[derive(Debug, Clone)]
pub struct Template {
    /// 고유 이름 (출력 파일명 라벨)
    pub name: String,
    /// 그레이스케일 래스터
    pub raster: GrayImage,
}

impl Template {
    /// 새 템플릿 생성
    pub fn new(name: impl Into<String>, raster: GrayImage) -> Self {
        Self {
            name: name.into(),
            raster,
        }
    }

    /// (너비, 높이)
    pub fn dimensions(&self) -> (u32, u32) {
        self.raster.dimensions()
    }
}

/// 불변 템플릿 집합: 이름과 래스터가 한 단위로 교체된다
#[derive(Debug, Default)]
pub struct TemplateSet {
    templates: Vec<Template>,
    version: u64,
}

impl TemplateSet {
    /// 새 집합 생성 (순서 = 매칭 순서)
    pub fn new(templates: Vec<Template>, version: u64) -> Self {
        Self { templates, version }
    }

    /// 빈 집합
    pub fn empty() -> Self {
        Self::default()
    }

    /// 템플릿 목록 (고정 순서)
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// 집합 버전 (교체마다 증가)
    pub fn version(&self) -> u64 {
        self.version
    }

    /// 템플릿 수
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// 비어있는지 여부
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
