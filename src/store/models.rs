//! 申请业务数据：档案、院校、文书、案例、时间线
//!
//! 只描述编排核心读写的字段；持久化细节由具体存储实现决定。

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 用户申请档案
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub name: Option<String>,
    pub gpa: Option<f32>,
    pub gpa_scale: Option<f32>,
    pub toefl: Option<u16>,
    pub ielts: Option<f32>,
    pub gre: Option<u16>,
    pub gmat: Option<u16>,
    pub undergraduate_school: Option<String>,
    pub major: Option<String>,
    pub target_major: Option<String>,
    #[serde(default)]
    pub target_countries: Vec<String>,
    pub application_season: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// 用于 system prompt 的一行摘要；无任何字段时返回 None
    pub fn summary_line(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(gpa) = self.gpa {
            match self.gpa_scale {
                Some(scale) => parts.push(format!("GPA {gpa}/{scale}")),
                None => parts.push(format!("GPA {gpa}")),
            }
        }
        if let Some(t) = self.toefl {
            parts.push(format!("TOEFL {t}"));
        }
        if let Some(i) = self.ielts {
            parts.push(format!("IELTS {i}"));
        }
        if let Some(g) = self.gre {
            parts.push(format!("GRE {g}"));
        }
        if let Some(g) = self.gmat {
            parts.push(format!("GMAT {g}"));
        }
        if let Some(m) = &self.major {
            parts.push(format!("本科专业 {m}"));
        }
        if let Some(m) = &self.target_major {
            parts.push(format!("目标专业 {m}"));
        }
        if !self.target_countries.is_empty() {
            parts.push(format!("目标国家 {}", self.target_countries.join("/")));
        }
        if let Some(s) = &self.application_season {
            parts.push(format!("申请季 {s}"));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("，"))
        }
    }
}

/// 档案局部更新（None 表示不修改）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    /// 姓名
    pub name: Option<String>,
    /// GPA 分数
    pub gpa: Option<f32>,
    /// GPA 满分（4.0 / 100 等）
    pub gpa_scale: Option<f32>,
    /// 托福总分
    pub toefl: Option<u16>,
    /// 雅思总分
    pub ielts: Option<f32>,
    /// GRE 总分
    pub gre: Option<u16>,
    /// GMAT 总分
    pub gmat: Option<u16>,
    /// 本科院校
    pub undergraduate_school: Option<String>,
    /// 本科专业
    pub major: Option<String>,
    /// 目标专业
    pub target_major: Option<String>,
    /// 目标国家 / 地区
    pub target_countries: Option<Vec<String>>,
    /// 申请季，如 2026Fall
    pub application_season: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ProfileUpdate::default()
    }

    pub fn apply_to(&self, profile: &mut Profile) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = &self.$field { profile.$field = Some(v.clone()); })*
            };
        }
        set!(
            name,
            gpa,
            gpa_scale,
            toefl,
            ielts,
            gre,
            gmat,
            undergraduate_school,
            major,
            target_major,
            application_season
        );
        if let Some(c) = &self.target_countries {
            profile.target_countries = c.clone();
        }
        profile.updated_at = Some(Utc::now());
    }
}

/// 院校 / 项目
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: String,
    pub name: String,
    pub name_zh: Option<String>,
    pub country: String,
    pub qs_rank: Option<u32>,
    pub us_news_rank: Option<u32>,
    pub acceptance_rate: Option<f32>,
    pub tuition_usd: Option<u32>,
    #[serde(default)]
    pub programs: Vec<String>,
    pub description: Option<String>,
}

impl School {
    fn matches_keyword(&self, keyword: &str) -> bool {
        let k = keyword.to_lowercase();
        self.name.to_lowercase().contains(&k)
            || self
                .name_zh
                .as_deref()
                .is_some_and(|n| n.contains(keyword))
            || self.programs.iter().any(|p| p.to_lowercase().contains(&k))
    }
}

/// 院校检索条件
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchoolQuery {
    /// 名称或专业关键词
    pub keyword: Option<String>,
    /// 国家 / 地区，如 US、UK、加拿大
    pub country: Option<String>,
    /// 排名上限（QS）
    pub max_rank: Option<u32>,
    /// 最多返回条数，默认 10
    pub limit: Option<usize>,
}

impl SchoolQuery {
    pub fn matches(&self, school: &School) -> bool {
        if let Some(k) = self.keyword.as_deref().filter(|k| !k.is_empty()) {
            if !school.matches_keyword(k) {
                return false;
            }
        }
        if let Some(c) = self.country.as_deref().filter(|c| !c.is_empty()) {
            if !school.country.eq_ignore_ascii_case(c) {
                return false;
            }
        }
        if let Some(max) = self.max_rank {
            match school.qs_rank {
                Some(r) if r <= max => {}
                _ => return false,
            }
        }
        true
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(10).clamp(1, 50)
    }
}

/// 用户文书
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Essay {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub essay_type: String,
    pub school_id: Option<String>,
    pub content: String,
    pub word_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// 文书润色请求的受理回执（润色本身异步完成）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolishTicket {
    pub ticket_id: String,
    pub essay_id: String,
    pub focus: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// 录取结果
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CaseResult {
    Admitted,
    Rejected,
    Waitlisted,
}

/// 往届申请案例
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionCase {
    pub id: String,
    pub school_id: String,
    pub school_name: String,
    pub program: String,
    pub result: CaseResult,
    pub gpa: Option<f32>,
    pub toefl: Option<u16>,
    pub gre: Option<u16>,
    pub background: Option<String>,
    pub season: String,
}

/// 案例检索条件
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaseQuery {
    /// 院校 ID 或名称关键词
    pub school: Option<String>,
    /// 专业关键词
    pub program: Option<String>,
    /// 录取结果过滤
    pub result: Option<CaseResult>,
    /// GPA 下限
    pub min_gpa: Option<f32>,
    /// 最多返回条数，默认 10
    pub limit: Option<usize>,
}

impl CaseQuery {
    pub fn matches(&self, case: &AdmissionCase) -> bool {
        if let Some(s) = self.school.as_deref().filter(|s| !s.is_empty()) {
            let lower = s.to_lowercase();
            if case.school_id != s && !case.school_name.to_lowercase().contains(&lower) {
                return false;
            }
        }
        if let Some(p) = self.program.as_deref().filter(|p| !p.is_empty()) {
            if !case.program.to_lowercase().contains(&p.to_lowercase()) {
                return false;
            }
        }
        if let Some(r) = self.result {
            if case.result != r {
                return false;
            }
        }
        if let Some(min) = self.min_gpa {
            if case.gpa.map_or(true, |g| g < min) {
                return false;
            }
        }
        true
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(10).clamp(1, 50)
    }
}

/// 申请时间线节点
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub school_id: Option<String>,
    pub due_date: NaiveDate,
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_update_only_touches_given_fields() {
        let mut p = Profile::empty("u1");
        p.toefl = Some(100);
        let update = ProfileUpdate {
            gpa: Some(3.7),
            target_countries: Some(vec!["US".into()]),
            ..Default::default()
        };
        update.apply_to(&mut p);
        assert_eq!(p.gpa, Some(3.7));
        assert_eq!(p.toefl, Some(100));
        assert_eq!(p.target_countries, vec!["US".to_string()]);
        assert!(p.updated_at.is_some());
    }

    #[test]
    fn test_profile_summary_line() {
        assert!(Profile::empty("u1").summary_line().is_none());
        let mut p = Profile::empty("u1");
        p.gpa = Some(3.8);
        p.gpa_scale = Some(4.0);
        p.toefl = Some(105);
        let line = p.summary_line().unwrap();
        assert!(line.contains("GPA 3.8/4"));
        assert!(line.contains("TOEFL 105"));
    }

    #[test]
    fn test_school_query_filters() {
        let school = School {
            id: "mit".into(),
            name: "Massachusetts Institute of Technology".into(),
            name_zh: Some("麻省理工学院".into()),
            country: "US".into(),
            qs_rank: Some(1),
            us_news_rank: Some(2),
            acceptance_rate: Some(0.04),
            tuition_usd: Some(60000),
            programs: vec!["Computer Science".into()],
            description: None,
        };
        let q = SchoolQuery {
            keyword: Some("麻省".into()),
            country: Some("us".into()),
            ..Default::default()
        };
        assert!(q.matches(&school));
        let q = SchoolQuery {
            max_rank: Some(0),
            ..Default::default()
        };
        assert!(!q.matches(&school));
    }
}
