//! Agent 回复结构与启发式抽取（后续建议、前端跳转动作）

use serde::{Deserialize, Serialize};

use crate::agent::AgentType;

/// 委派信号：编排器据此切换到目标 Agent 继续处理
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub target: AgentType,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 前端可执行的动作（目前只有页面跳转）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    pub target: String,
}

impl SuggestedAction {
    pub fn navigate(label: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: "navigate".to_string(),
            label: label.into(),
            target: target.into(),
        }
    }
}

/// 一次处理的最终结果（非流式调用方收到的 JSON）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub message: String,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_to: Option<Delegation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<SuggestedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl AgentResponse {
    pub fn new(agent_type: AgentType, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            agent_type,
            delegated_to: None,
            tools_used: Vec::new(),
            suggestions: Vec::new(),
            actions: Vec::new(),
            data: None,
            conversation_id: None,
        }
    }

    pub fn delegation(agent_type: AgentType, delegation: Delegation) -> Self {
        let mut r = Self::new(agent_type, String::new());
        r.delegated_to = Some(delegation);
        r
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_used = tools;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// 从正文抽取建议与动作（已有时不覆盖）
    pub fn enrich(mut self) -> Self {
        if self.suggestions.is_empty() {
            self.suggestions = extract_suggestions(&self.message);
        }
        if self.actions.is_empty() {
            self.actions = extract_actions(&self.message, self.agent_type);
        }
        self
    }
}

const MAX_SUGGESTIONS: usize = 3;

/// 取「建议/下一步/你可以」段落后的列表项，最多 3 条
pub fn extract_suggestions(text: &str) -> Vec<String> {
    let markers = ["建议", "下一步", "你可以", "Next steps", "Suggestions", "You can"];
    let mut in_section = false;
    let mut out = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if markers.iter().any(|m| trimmed.contains(m)) && !is_list_item(trimmed) {
            in_section = true;
            continue;
        }
        if in_section {
            if let Some(item) = list_item_text(trimmed) {
                if !item.is_empty() {
                    out.push(item.to_string());
                }
                if out.len() >= MAX_SUGGESTIONS {
                    break;
                }
            } else if !trimmed.is_empty() {
                in_section = false;
            }
        }
    }
    out
}

fn is_list_item(line: &str) -> bool {
    list_item_text(line).is_some()
}

/// "- xx" / "* xx" / "• xx" / "1. xx" / "1、xx" → "xx"
fn list_item_text(line: &str) -> Option<&str> {
    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return Some(rest.trim());
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        for sep in [". ", "、", ".", ")"] {
            if let Some(item) = rest.strip_prefix(sep) {
                return Some(item.trim());
            }
        }
    }
    None
}

/// 按关键词与当前 Agent 推导前端跳转
pub fn extract_actions(text: &str, agent: AgentType) -> Vec<SuggestedAction> {
    let table: [(AgentType, &[&str], &str, &str); 5] = [
        (AgentType::School, &["学校", "院校", "school"], "查看院校库", "/schools"),
        (AgentType::Essay, &["文书", "essay", "个人陈述"], "打开我的文书", "/essays"),
        (AgentType::Timeline, &["截止", "时间线", "deadline"], "查看申请时间线", "/timeline"),
        (AgentType::Case, &["案例", "offer", "case"], "浏览录取案例", "/cases"),
        (AgentType::Profile, &["档案", "GPA", "profile"], "完善我的档案", "/profile"),
    ];
    let lower = text.to_lowercase();
    table
        .iter()
        .filter(|(owner, words, _, _)| {
            *owner == agent || words.iter().any(|w| lower.contains(&w.to_lowercase()))
        })
        .map(|(_, _, label, target)| SuggestedAction::navigate(*label, *target))
        .take(2)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_suggestions() {
        let text = "你的背景不错。\n\n建议：\n1. 补充一段科研经历\n2、把托福提到105以上\n- 准备GRE\n- 多余的一条\n\n祝顺利";
        let s = extract_suggestions(text);
        assert_eq!(s, vec!["补充一段科研经历", "把托福提到105以上", "准备GRE"]);
        assert!(extract_suggestions("没有列表").is_empty());
    }

    #[test]
    fn test_extract_actions_prefers_owner_agent() {
        let actions = extract_actions("这几所院校的截止日期都在12月", AgentType::School);
        assert_eq!(actions[0].target, "/schools");
        assert_eq!(actions[1].target, "/timeline");
        assert!(extract_actions("hello", AgentType::Orchestrator).is_empty());
    }

    #[test]
    fn test_response_json_shape() {
        let r = AgentResponse::new(AgentType::Essay, "ok").with_tools(vec!["get_essay".into()]);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["agentType"], "essay");
        assert_eq!(v["toolsUsed"][0], "get_essay");
        assert!(v.get("delegatedTo").is_none());
        assert!(v.get("suggestions").is_none());
    }
}
