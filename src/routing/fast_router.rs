//! 快速路由：关键词 / 正则打分，高置信度时跳过模型直接选定专家 Agent
//!
//! 评分：每个命中的正则 +0.5，每个命中的关键词 +0.15，命中关键词 ≥3 个再 +0.2；
//! 上限 1.0，再乘以规则自身的置信系数。得分最高的规则达到阈值（默认 0.7）即直接路由。
//! 另有极短消息（问候、感谢、告别）的固定回复，不经过任何 Agent。

use regex::Regex;
use serde::Serialize;

use crate::agent::AgentType;
use crate::routing::Locale;

pub const DEFAULT_THRESHOLD: f32 = 0.7;
pub const PATTERN_WEIGHT: f32 = 0.5;
pub const KEYWORD_WEIGHT: f32 = 0.15;
pub const KEYWORD_BONUS: f32 = 0.2;
pub const KEYWORD_BONUS_MIN: usize = 3;
/// 固定回复只对字符数小于此值的消息生效
pub const SIMPLE_REPLY_MAX_CHARS: usize = 20;

/// 单次路由结果（不持久化）
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingResult {
    pub agent: Option<AgentType>,
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
    #[serde(rename = "shouldUseLLM")]
    pub should_use_llm: bool,
}

impl RoutingResult {
    fn needs_llm() -> Self {
        Self {
            agent: None,
            confidence: 0.0,
            matched_keywords: Vec::new(),
            should_use_llm: true,
        }
    }
}

pub struct RoutingRule {
    pub agent: AgentType,
    pub keywords: Vec<String>,
    pub patterns: Vec<Regex>,
    pub confidence: f32,
}

impl RoutingRule {
    pub fn new(
        agent: AgentType,
        keywords: &[&str],
        patterns: &[&str],
        confidence: f32,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            agent,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            patterns: patterns.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
            confidence,
        })
    }

    /// 返回 (得分, 命中的关键词)
    fn score(&self, message: &str, lower: &str) -> (f32, Vec<String>) {
        let matched: Vec<String> = self
            .keywords
            .iter()
            .filter(|k| contains_keyword(lower, k))
            .cloned()
            .collect();
        let patterns = self.patterns.iter().filter(|p| p.is_match(message)).count();

        let mut raw = patterns as f32 * PATTERN_WEIGHT + matched.len() as f32 * KEYWORD_WEIGHT;
        if matched.len() >= KEYWORD_BONUS_MIN {
            raw += KEYWORD_BONUS;
        }
        (raw.min(1.0) * self.confidence, matched)
    }
}

/// ASCII 关键词按词边界匹配（避免 "ps" 命中 "perhaps"），其余按子串匹配
fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    if !keyword.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
        return haystack.contains(keyword);
    }
    let bytes = haystack.as_bytes();
    haystack.match_indices(keyword).any(|(start, m)| {
        let end = start + m.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after_ok = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        before_ok && after_ok
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SimpleKind {
    Greeting,
    Thanks,
    Goodbye,
    Ack,
}

impl SimpleKind {
    fn reply(&self, locale: Locale) -> &'static str {
        match self {
            SimpleKind::Greeting => locale.pick(
                "你好！我是你的留学申请助手，可以帮你完善档案、选校、修改文书、查看录取案例和规划申请时间线。有什么可以帮你的？",
                "Hi! I'm your study-abroad assistant. I can help with your profile, school selection, essays, admission cases and application timeline. What can I do for you?",
            ),
            SimpleKind::Thanks => locale.pick(
                "不客气！还有其他申请上的问题随时问我。",
                "You're welcome! Feel free to ask anything else about your applications.",
            ),
            SimpleKind::Goodbye => locale.pick(
                "再见，祝申请顺利！",
                "Goodbye, and good luck with your applications!",
            ),
            SimpleKind::Ack => locale.pick(
                "好的，有需要随时告诉我。",
                "Got it. Let me know whenever you need anything.",
            ),
        }
    }
}

pub struct FastRouter {
    rules: Vec<RoutingRule>,
    simple: Vec<(Regex, SimpleKind)>,
    threshold: f32,
}

impl FastRouter {
    pub fn new(rules: Vec<RoutingRule>, threshold: f32) -> Result<Self, regex::Error> {
        let tail = r"[\s!！。.~～,，?？]*$";
        let simple = vec![
            (
                Regex::new(&format!(r"(?i)^\s*(你好|您好|嗨|哈喽|hi|hello|hey|早上好|下午好|晚上好){tail}"))?,
                SimpleKind::Greeting,
            ),
            (
                Regex::new(&format!(r"(?i)^\s*(谢谢|多谢|感谢|thanks|thank you|thx)(你|您|啦)?{tail}"))?,
                SimpleKind::Thanks,
            ),
            (
                Regex::new(&format!(r"(?i)^\s*(再见|拜拜|bye|goodbye|see you){tail}"))?,
                SimpleKind::Goodbye,
            ),
            (
                Regex::new(&format!(r"(?i)^\s*(好的|好|嗯|嗯嗯|ok|okay|明白了|知道了){tail}"))?,
                SimpleKind::Ack,
            ),
        ];
        Ok(Self {
            rules,
            simple,
            threshold,
        })
    }

    /// 五个专家 Agent 的默认规则（中英文关键词）
    pub fn with_default_rules(threshold: f32) -> Result<Self, regex::Error> {
        Self::new(default_rules()?, threshold)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn route(&self, message: &str) -> RoutingResult {
        let lower = message.to_lowercase();
        let best = self
            .rules
            .iter()
            .map(|r| {
                let (score, matched) = r.score(message, &lower);
                (r.agent, score, matched)
            })
            .filter(|(_, score, _)| *score > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let Some((agent, confidence, matched_keywords)) = best else {
            return RoutingResult::needs_llm();
        };
        let direct = confidence >= self.threshold;
        tracing::debug!(
            agent = agent.as_str(),
            confidence,
            direct,
            "fast route scored"
        );
        RoutingResult {
            agent: direct.then_some(agent),
            confidence,
            matched_keywords,
            should_use_llm: !direct,
        }
    }

    /// 极短消息的固定回复；字符数 ≥ SIMPLE_REPLY_MAX_CHARS 时不匹配
    pub fn get_simple_response(&self, message: &str, locale: Locale) -> Option<String> {
        let trimmed = message.trim();
        if trimmed.is_empty() || trimmed.chars().count() >= SIMPLE_REPLY_MAX_CHARS {
            return None;
        }
        self.simple
            .iter()
            .find(|(re, _)| re.is_match(trimmed))
            .map(|(_, kind)| kind.reply(locale).to_string())
    }
}

fn default_rules() -> Result<Vec<RoutingRule>, regex::Error> {
    Ok(vec![
        RoutingRule::new(
            AgentType::Essay,
            &[
                "文书", "润色", "个人陈述", "推荐信", "简历", "ps", "sop", "cv", "essay",
                "personal statement", "polish", "修改", "写作",
            ],
            &[
                r"(?i)(润色|修改|改一下|看一下|检查|优化).{0,8}(文书|个人陈述|推荐信|ps|sop|essay)",
                r"(?i)(文书|个人陈述|ps|sop|essay).{0,8}(润色|修改|怎么写|建议)",
                r"(?i)(polish|proofread|revise|review).{0,20}(essay|statement|sop)",
            ],
            0.95,
        )?,
        RoutingRule::new(
            AgentType::School,
            &[
                "选校", "学校", "院校", "大学", "排名", "qs", "录取率", "学费", "项目",
                "school", "university", "ranking", "program",
            ],
            &[
                r"(选校|择校|定校)",
                r"(?i)(推荐|有哪些|对比|比较).{0,8}(学校|院校|大学|项目|school|university)",
                r"(?i)(qs|us ?news|排名).{0,6}(前|top)\s*\d+",
            ],
            0.9,
        )?,
        RoutingRule::new(
            AgentType::Profile,
            &[
                "档案", "背景", "gpa", "绩点", "托福", "雅思", "toefl", "ielts", "gre", "gmat",
                "成绩", "profile", "background",
            ],
            &[
                r"(?i)(我的|更新|修改|完善).{0,6}(档案|背景|成绩|gpa|托福|雅思)",
                r"(?i)(gpa|托福|雅思|toefl|ielts|gre|gmat)\s*(是|为|考了)?\s*\d",
            ],
            0.9,
        )?,
        RoutingRule::new(
            AgentType::Case,
            &[
                "案例", "offer", "录取结果", "拒信", "往届", "学长", "学姐", "背景相似",
                "case", "admitted", "rejected",
            ],
            &[
                r"(类似|相似|同样).{0,6}(背景|案例)",
                r"(?i)(有没有|看看|查一下).{0,6}(案例|offer)",
            ],
            0.85,
        )?,
        RoutingRule::new(
            AgentType::Timeline,
            &[
                "时间线", "截止", "deadline", "ddl", "规划", "时间安排", "时间表", "递交",
                "日程", "timeline", "schedule",
            ],
            &[
                r"(?i)(截止|deadline|ddl).{0,6}(日期|时间|是|在)",
                r"(?i)(申请|准备).{0,6}(时间线|规划|计划|时间表)",
            ],
            0.9,
        )?,
    ])
}
