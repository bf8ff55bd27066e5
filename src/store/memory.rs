//! 进程内业务存储（默认实现，测试与本地运行使用）

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    AdmissionCase, AdmissionsStore, CaseQuery, Essay, PolishTicket, Profile, ProfileUpdate, School,
    SchoolQuery, StoreError, TimelineEvent,
};

#[derive(Default)]
pub struct InMemoryAdmissionsStore {
    profiles: RwLock<HashMap<String, Profile>>,
    schools: RwLock<Vec<School>>,
    essays: RwLock<Vec<Essay>>,
    cases: RwLock<Vec<AdmissionCase>>,
    timeline: RwLock<Vec<TimelineEvent>>,
    polish_requests: AtomicU64,
}

impl InMemoryAdmissionsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_profile(&self, profile: Profile) {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile);
    }

    pub async fn insert_school(&self, school: School) {
        self.schools.write().await.push(school);
    }

    pub async fn insert_essay(&self, essay: Essay) {
        self.essays.write().await.push(essay);
    }

    pub async fn insert_case(&self, case: AdmissionCase) {
        self.cases.write().await.push(case);
    }

    pub async fn insert_event(&self, event: TimelineEvent) {
        self.timeline.write().await.push(event);
    }

    /// 已受理的润色请求数
    pub fn polish_requests(&self) -> u64 {
        self.polish_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdmissionsStore for InMemoryAdmissionsStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile, StoreError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile::empty(user_id));
        update.apply_to(profile);
        Ok(profile.clone())
    }

    async fn search_schools(&self, query: &SchoolQuery) -> Result<Vec<School>, StoreError> {
        let schools = self.schools.read().await;
        let mut hits: Vec<School> = schools.iter().filter(|s| query.matches(s)).cloned().collect();
        hits.sort_by_key(|s| s.qs_rank.unwrap_or(u32::MAX));
        hits.truncate(query.limit());
        Ok(hits)
    }

    async fn get_school(&self, school_id: &str) -> Result<Option<School>, StoreError> {
        Ok(self
            .schools
            .read()
            .await
            .iter()
            .find(|s| s.id == school_id)
            .cloned())
    }

    async fn list_essays(&self, user_id: &str) -> Result<Vec<Essay>, StoreError> {
        let mut list: Vec<Essay> = self
            .essays
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    async fn get_essay(&self, user_id: &str, essay_id: &str) -> Result<Option<Essay>, StoreError> {
        Ok(self
            .essays
            .read()
            .await
            .iter()
            .find(|e| e.id == essay_id && e.user_id == user_id)
            .cloned())
    }

    async fn request_polish(
        &self,
        user_id: &str,
        essay_id: &str,
        focus: Option<&str>,
    ) -> Result<PolishTicket, StoreError> {
        if self.get_essay(user_id, essay_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("essay {essay_id}")));
        }
        let n = self.polish_requests.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PolishTicket {
            ticket_id: format!("polish-{n}"),
            essay_id: essay_id.to_string(),
            focus: focus.map(String::from),
            status: "queued".to_string(),
            created_at: Utc::now(),
        })
    }

    async fn search_cases(&self, query: &CaseQuery) -> Result<Vec<AdmissionCase>, StoreError> {
        let cases = self.cases.read().await;
        let mut hits: Vec<AdmissionCase> = cases.iter().filter(|c| query.matches(c)).cloned().collect();
        hits.truncate(query.limit());
        Ok(hits)
    }

    async fn get_timeline(&self, user_id: &str) -> Result<Vec<TimelineEvent>, StoreError> {
        let mut events: Vec<TimelineEvent> = self
            .timeline
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.due_date);
        Ok(events)
    }
}
