//! Agent 类型与静态配置表
//!
//! AgentType 是封闭枚举，每个变体对应一份编译期配置（显示名、prompt 模板、可用工具、可委派目标、采样参数）。
//! 启动时用 validate_agent_configs 对照工具注册表做一次校验，之后不再做运行时查找。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::agent::prompt;
use crate::core::AgentError;
use crate::tools::ToolRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Orchestrator,
    Profile,
    School,
    Essay,
    Case,
    Timeline,
}

impl AgentType {
    pub const ALL: [AgentType; 6] = [
        AgentType::Orchestrator,
        AgentType::Profile,
        AgentType::School,
        AgentType::Essay,
        AgentType::Case,
        AgentType::Timeline,
    ];

    /// 五个专家（不含 Orchestrator）
    pub const SPECIALISTS: [AgentType; 5] = [
        AgentType::Profile,
        AgentType::School,
        AgentType::Essay,
        AgentType::Case,
        AgentType::Timeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Orchestrator => "orchestrator",
            AgentType::Profile => "profile",
            AgentType::School => "school",
            AgentType::Essay => "essay",
            AgentType::Case => "case",
            AgentType::Timeline => "timeline",
        }
    }

    /// 忽略大小写，并接受 xxx_agent 写法
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let name = lower.strip_suffix("_agent").unwrap_or(&lower);
        AgentType::ALL.into_iter().find(|a| a.as_str() == name)
    }

    pub fn config(&self) -> &'static AgentConfig {
        match self {
            AgentType::Orchestrator => &AGENT_CONFIGS[0],
            AgentType::Profile => &AGENT_CONFIGS[1],
            AgentType::School => &AGENT_CONFIGS[2],
            AgentType::Essay => &AGENT_CONFIGS[3],
            AgentType::Case => &AGENT_CONFIGS[4],
            AgentType::Timeline => &AGENT_CONFIGS[5],
        }
    }

    pub fn display_name(&self) -> &'static str {
        self.config().display_name
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::parse(s).ok_or_else(|| AgentError::InvalidDelegation(format!("unknown agent: {s}")))
    }
}

/// 单个 Agent 的静态配置
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_type: AgentType,
    pub display_name: &'static str,
    pub prompt_template: &'static str,
    pub tools: &'static [&'static str],
    pub can_delegate_to: &'static [AgentType],
    pub temperature: f32,
    pub max_tokens: u32,
}

impl AgentConfig {
    pub fn can_delegate(&self, target: AgentType) -> bool {
        self.can_delegate_to.contains(&target)
    }
}

pub static AGENT_CONFIGS: [AgentConfig; 6] = [
    AgentConfig {
        agent_type: AgentType::Orchestrator,
        display_name: "留学顾问",
        prompt_template: prompt::ORCHESTRATOR,
        tools: &["get_profile", "get_deadlines"],
        can_delegate_to: &AgentType::SPECIALISTS,
        temperature: 0.7,
        max_tokens: 2000,
    },
    AgentConfig {
        agent_type: AgentType::Profile,
        display_name: "档案分析师",
        prompt_template: prompt::PROFILE,
        tools: &["get_profile", "update_profile"],
        can_delegate_to: &[AgentType::School, AgentType::Orchestrator],
        temperature: 0.5,
        max_tokens: 2000,
    },
    AgentConfig {
        agent_type: AgentType::School,
        display_name: "选校顾问",
        prompt_template: prompt::SCHOOL,
        tools: &["search_schools", "get_school_detail", "compare_schools", "get_profile"],
        can_delegate_to: &[AgentType::Case, AgentType::Orchestrator],
        temperature: 0.6,
        max_tokens: 2500,
    },
    AgentConfig {
        agent_type: AgentType::Essay,
        display_name: "文书导师",
        prompt_template: prompt::ESSAY,
        tools: &["list_essays", "get_essay", "polish_essay", "get_profile"],
        can_delegate_to: &[AgentType::Profile, AgentType::Orchestrator],
        temperature: 0.8,
        max_tokens: 3000,
    },
    AgentConfig {
        agent_type: AgentType::Case,
        display_name: "案例分析师",
        prompt_template: prompt::CASE,
        tools: &["search_cases", "get_profile"],
        can_delegate_to: &[AgentType::School, AgentType::Orchestrator],
        temperature: 0.6,
        max_tokens: 2000,
    },
    AgentConfig {
        agent_type: AgentType::Timeline,
        display_name: "时间规划师",
        prompt_template: prompt::TIMELINE,
        tools: &["get_timeline", "get_deadlines", "get_school_detail"],
        can_delegate_to: &[AgentType::School, AgentType::Orchestrator],
        temperature: 0.4,
        max_tokens: 2000,
    },
];

/// 启动校验：引用了未注册工具是硬错误；自委派只记警告。返回警告列表
pub fn validate_agent_configs(
    configs: &[AgentConfig],
    registry: &ToolRegistry,
) -> Result<Vec<String>, AgentError> {
    let mut warnings = Vec::new();
    for cfg in configs {
        for tool in cfg.tools {
            if !registry.contains(tool) {
                return Err(AgentError::ConfigError(format!(
                    "agent {} references unknown tool {tool}",
                    cfg.agent_type
                )));
            }
        }
        if cfg.can_delegate(cfg.agent_type) {
            let w = format!("agent {} lists itself as a delegation target", cfg.agent_type);
            tracing::warn!("{}", w);
            warnings.push(w);
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_suffix_and_case() {
        assert_eq!(AgentType::parse("ESSAY"), Some(AgentType::Essay));
        assert_eq!(AgentType::parse("school_agent"), Some(AgentType::School));
        assert_eq!(AgentType::parse("visa"), None);
        assert!("visa".parse::<AgentType>().is_err());
    }

    #[test]
    fn test_config_table_matches_variants() {
        for agent in AgentType::ALL {
            assert_eq!(agent.config().agent_type, agent);
        }
        assert!(AgentType::Orchestrator.config().can_delegate(AgentType::Essay));
        assert!(AgentType::Essay.config().can_delegate(AgentType::Orchestrator));
        assert!(!AgentType::Essay.config().can_delegate(AgentType::Timeline));
    }

    #[test]
    fn test_builtin_configs_validate() {
        let registry = ToolRegistry::with_builtin_tools().unwrap();
        let warnings = validate_agent_configs(&AGENT_CONFIGS, &registry).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unknown_tool_and_self_delegation() {
        let registry = ToolRegistry::with_builtin_tools().unwrap();
        let bad = AgentConfig {
            tools: &["book_flight"],
            ..AGENT_CONFIGS[1].clone()
        };
        assert!(matches!(
            validate_agent_configs(&[bad], &registry),
            Err(AgentError::ConfigError(_))
        ));

        let selfish = AgentConfig {
            can_delegate_to: &[AgentType::Profile],
            ..AGENT_CONFIGS[1].clone()
        };
        let warnings = validate_agent_configs(&[selfish], &registry).unwrap();
        assert_eq!(warnings.len(), 1);
    }
}
