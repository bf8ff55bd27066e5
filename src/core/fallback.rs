//! 降级服务：把编排边界上捕获的错误归类，并给出面向用户的降级回复
//!
//! 先按错误变体归类；只有 provider 原样给出的文本（ApiError、工具失败、存储后端错误）才做关键词匹配，
//! 其中 HTTP 状态码按整词匹配。unknown 类别不向用户暴露任何内部细节。

use serde::Serialize;
use serde_json::json;

use crate::agent::{AgentResponse, AgentType, SuggestedAction};
use crate::core::AgentError;
use crate::llm::traits::mentions_code;
use crate::llm::LlmError;
use crate::routing::Locale;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    RateLimit,
    Quota,
    Network,
    CircuitOpen,
    Moderation,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Quota => "quota",
            ErrorCategory::Network => "network",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Moderation => "moderation",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// 按顺序匹配，先命中者为准
const CATEGORY_MARKERS: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::CircuitOpen, &["circuit", "熔断"]),
    (ErrorCategory::Timeout, &["timeout", "timed out", "deadline", "超时"]),
    (
        ErrorCategory::RateLimit,
        &["rate limit", "rate_limit", "ratelimit", "429", "too many requests", "限流"],
    ),
    (ErrorCategory::Quota, &["quota", "insufficient", "billing", "402", "额度"]),
    (
        ErrorCategory::Moderation,
        &["moderation", "content_filter", "content policy", "safety", "审核"],
    ),
    (
        ErrorCategory::Network,
        &["network", "connection", "econnrefused", "econnreset", "dns", "socket", "unreachable", "网络"],
    ),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackService;

impl FallbackService {
    pub fn new() -> Self {
        Self
    }

    pub fn categorize(&self, err: &AgentError) -> ErrorCategory {
        match err {
            AgentError::LlmError(e) => match e {
                LlmError::Timeout => ErrorCategory::Timeout,
                LlmError::RateLimited { .. } => ErrorCategory::RateLimit,
                LlmError::QuotaExceeded(_) => ErrorCategory::Quota,
                LlmError::Network(_) => ErrorCategory::Network,
                LlmError::Moderation(_) => ErrorCategory::Moderation,
                LlmError::ApiError(msg) => self.categorize_message(msg),
            },
            AgentError::ToolTimeout(_) => ErrorCategory::Timeout,
            AgentError::CircuitOpen(_) => ErrorCategory::CircuitOpen,
            AgentError::ToolExecutionFailed(msg) => self.categorize_message(msg),
            AgentError::Storage(StoreError::Backend(msg)) => self.categorize_message(msg),
            _ => ErrorCategory::Unknown,
        }
    }

    pub fn categorize_message(&self, text: &str) -> ErrorCategory {
        let lower = text.to_lowercase();
        CATEGORY_MARKERS
            .iter()
            .find(|(_, markers)| markers.iter().any(|m| matches_marker(&lower, m)))
            .map(|(c, _)| *c)
            .unwrap_or(ErrorCategory::Unknown)
    }

    pub fn should_retry(&self, category: ErrorCategory) -> bool {
        matches!(
            category,
            ErrorCategory::Timeout | ErrorCategory::Network | ErrorCategory::Unknown
        )
    }

    pub fn should_silence(&self, category: ErrorCategory) -> bool {
        category == ErrorCategory::Unknown
    }

    pub fn fallback_response(&self, category: ErrorCategory, agent: AgentType, locale: Locale) -> AgentResponse {
        let base = match category {
            ErrorCategory::Timeout => locale.pick(
                "抱歉，处理时间有点长，请稍后再试一次。",
                "Sorry, that took too long. Please try again in a moment.",
            ),
            ErrorCategory::RateLimit => locale.pick(
                "当前咨询的同学比较多，请稍等片刻再发送。",
                "We are handling a lot of requests right now. Please wait a moment and try again.",
            ),
            ErrorCategory::Quota => locale.pick(
                "AI 助手今天的服务额度已用完，请稍后再来，或先浏览站内的资料。",
                "The assistant has reached its usage limit for now. Please come back later or browse the site in the meantime.",
            ),
            ErrorCategory::Network => locale.pick(
                "网络连接出了点问题，请检查网络后重试。",
                "There was a network problem. Please check your connection and try again.",
            ),
            ErrorCategory::CircuitOpen => locale.pick(
                "相关服务暂时不可用，我们正在恢复中，请过几分钟再试。",
                "That service is temporarily unavailable. Please try again in a few minutes.",
            ),
            ErrorCategory::Moderation => locale.pick(
                "这个问题我没办法回答，换个问法试试吧。",
                "I can't help with that request. Could you rephrase it?",
            ),
            ErrorCategory::Unknown => locale.pick(
                "抱歉，出了点问题，请稍后再试。",
                "Sorry, something went wrong. Please try again later.",
            ),
        };

        let mut response = AgentResponse::new(agent, base);
        if let Some((hint, action)) = agent_hint(agent, locale) {
            response.message = format!("{base}\n\n{hint}");
            response.actions = vec![action];
        }
        response.with_data(json!({ "fallback": true, "errorCategory": category }))
    }

    /// 边界处理：记录原始错误并返回降级回复
    pub fn respond(&self, err: &AgentError, agent: AgentType, locale: Locale) -> AgentResponse {
        let category = self.categorize(err);
        if self.should_silence(category) {
            tracing::error!(agent = %agent, category = category.as_str(), error = %err, "unhandled error, silenced");
        } else {
            tracing::warn!(agent = %agent, category = category.as_str(), error = %err, "degraded response");
        }
        self.fallback_response(category, agent, locale)
    }
}

/// 纯数字标记（状态码）按整词匹配，其余按子串
fn matches_marker(lower: &str, marker: &str) -> bool {
    if marker.bytes().all(|b| b.is_ascii_digit()) {
        mentions_code(lower, marker)
    } else {
        lower.contains(marker)
    }
}

/// 各 Agent 在降级时给出的自助入口
fn agent_hint(agent: AgentType, locale: Locale) -> Option<(&'static str, SuggestedAction)> {
    let (zh, en, label_zh, label_en, target) = match agent {
        AgentType::School => (
            "你也可以先在院校库中按国家和专业筛选学校。",
            "Meanwhile, you can browse the school directory and filter by country and program.",
            "浏览院校库",
            "Browse schools",
            "/schools",
        ),
        AgentType::Essay => (
            "你可以先在文书中心查看和编辑自己的文书。",
            "Meanwhile, you can review and edit your essays in the essay center.",
            "打开文书中心",
            "Open essays",
            "/essays",
        ),
        AgentType::Case => (
            "你也可以直接在案例库里搜索往年的录取案例。",
            "Meanwhile, you can search past admission results in the case library.",
            "浏览录取案例",
            "Browse cases",
            "/cases",
        ),
        AgentType::Timeline => (
            "申请时间线页面里可以查看所有截止日期。",
            "All deadlines are listed on your timeline page.",
            "查看时间线",
            "View timeline",
            "/timeline",
        ),
        AgentType::Profile => (
            "你可以在个人档案页面直接更新成绩和背景。",
            "You can update your scores and background on the profile page.",
            "编辑档案",
            "Edit profile",
            "/profile",
        ),
        AgentType::Orchestrator => return None,
    };
    Some((
        locale.pick(zh, en),
        SuggestedAction::navigate(locale.pick(label_zh, label_en), target),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_categorize_errors() {
        let f = FallbackService::new();
        assert_eq!(f.categorize(&AgentError::LlmError(LlmError::Timeout)), ErrorCategory::Timeout);
        assert_eq!(f.categorize(&AgentError::ToolTimeout("get_essay".into())), ErrorCategory::Timeout);
        assert_eq!(
            f.categorize(&AgentError::LlmError(LlmError::RateLimited { retry_after_ms: 10 })),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            f.categorize(&AgentError::LlmError(LlmError::from_message("HTTP 402 insufficient_quota"))),
            ErrorCategory::Quota
        );
        assert_eq!(f.categorize(&AgentError::CircuitOpen("search_schools".into())), ErrorCategory::CircuitOpen);
        assert_eq!(
            f.categorize(&AgentError::LlmError(LlmError::Network("connection reset".into()))),
            ErrorCategory::Network
        );
        assert_eq!(f.categorize_message("flagged by content_filter"), ErrorCategory::Moderation);
        assert_eq!(f.categorize(&AgentError::ConfigError("bad".into())), ErrorCategory::Unknown);
    }

    #[test]
    fn test_status_codes_need_word_boundaries() {
        let f = FallbackService::new();
        let not_found = AgentError::Storage(StoreError::NotFound(
            "conversation 4291402a-0429-4402-a429-000000000402".into(),
        ));
        assert_eq!(f.categorize(&not_found), ErrorCategory::Unknown);
        let forbidden = AgentError::Storage(StoreError::Forbidden {
            id: "c0429-402".into(),
        });
        assert_eq!(f.categorize(&forbidden), ErrorCategory::Unknown);
        assert_eq!(
            f.categorize(&AgentError::ToolExecutionFailed("school not found: id-4290".into())),
            ErrorCategory::Unknown
        );

        assert_eq!(
            f.categorize(&AgentError::LlmError(LlmError::ApiError("status 429: slow down".into()))),
            ErrorCategory::RateLimit
        );
        assert_eq!(f.categorize_message("HTTP 402"), ErrorCategory::Quota);
        assert_eq!(
            f.categorize(&AgentError::Storage(StoreError::Backend("connection refused".into()))),
            ErrorCategory::Network
        );
    }

    #[test]
    fn test_retry_and_silence_policy() {
        let f = FallbackService::new();
        assert!(f.should_retry(ErrorCategory::Timeout));
        assert!(f.should_retry(ErrorCategory::Network));
        assert!(f.should_retry(ErrorCategory::Unknown));
        assert!(!f.should_retry(ErrorCategory::RateLimit));
        assert!(!f.should_retry(ErrorCategory::Quota));
        assert!(f.should_silence(ErrorCategory::Unknown));
        assert!(!f.should_silence(ErrorCategory::Timeout));
    }

    #[test]
    fn test_school_fallback_points_to_directory() {
        let f = FallbackService::new();
        let r = f.fallback_response(ErrorCategory::Timeout, AgentType::School, Locale::Zh);
        assert!(r.message.contains("院校库"));
        assert_eq!(r.actions[0].target, "/schools");
        assert_eq!(r.data.as_ref().unwrap()["errorCategory"], "timeout");

        let r = f.fallback_response(ErrorCategory::Unknown, AgentType::Orchestrator, Locale::En);
        assert!(r.actions.is_empty());
        assert!(r.message.starts_with("Sorry"));
    }

    #[test]
    fn test_unknown_error_detail_not_leaked() {
        let f = FallbackService::new();
        let err = AgentError::ConfigError("secret path /etc/liuxue".into());
        let r = f.respond(&err, AgentType::Essay, Locale::Zh);
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("/etc/liuxue"));
    }
}
