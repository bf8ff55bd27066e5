//! 业务存储边界：档案、院校、文书、案例、时间线
//!
//! 编排核心只依赖 AdmissionsStore trait；默认实现为进程内 InMemoryAdmissionsStore，
//! 真实部署时替换为数据库实现。

pub mod memory;
pub mod models;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryAdmissionsStore;
pub use models::{
    AdmissionCase, CaseQuery, CaseResult, Essay, PolishTicket, Profile, ProfileUpdate, School,
    SchoolQuery, TimelineEvent,
};

/// 存储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conversation {id} belongs to another user")]
    Forbidden { id: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// 业务数据存储
#[async_trait]
pub trait AdmissionsStore: Send + Sync {
    /// 档案不存在时返回 Ok(None)
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError>;

    /// 不存在时新建后再应用更新
    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile, StoreError>;

    async fn search_schools(&self, query: &SchoolQuery) -> Result<Vec<School>, StoreError>;

    async fn get_school(&self, school_id: &str) -> Result<Option<School>, StoreError>;

    async fn list_essays(&self, user_id: &str) -> Result<Vec<Essay>, StoreError>;

    async fn get_essay(&self, user_id: &str, essay_id: &str) -> Result<Option<Essay>, StoreError>;

    async fn request_polish(
        &self,
        user_id: &str,
        essay_id: &str,
        focus: Option<&str>,
    ) -> Result<PolishTicket, StoreError>;

    async fn search_cases(&self, query: &CaseQuery) -> Result<Vec<AdmissionCase>, StoreError>;

    /// 按截止日期升序
    async fn get_timeline(&self, user_id: &str) -> Result<Vec<TimelineEvent>, StoreError>;
}
