//! 工具注册表
//!
//! 每个工具是一条声明式定义（名称、描述、schemars 生成的参数 schema、handler 引用 `category.method`）。
//! 注册时解析并校验 handler：未知类别或方法直接报错，运行时不再出现查找失败。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::core::AgentError;
use crate::llm::ToolSchema;
use crate::tools::schema::{
    parameters_of, CompareSchoolsArgs, DelegateArgs, EmptyArgs, GetDeadlinesArgs, GetEssayArgs,
    PolishEssayArgs, SchoolDetailArgs,
};
use crate::store::{CaseQuery, ProfileUpdate, SchoolQuery};

/// 委派工具名（由执行器特殊处理，不进入任何 handler）
pub const DELEGATE_TOOL: &str = "delegate";

/// 有副作用、禁止自动重试的工具
pub const NON_RETRYABLE_TOOLS: &[&str] = &["update_profile", "polish_essay"];

/// handler 类别，对应一张方法分发表
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerCategory {
    Profile,
    School,
    Essay,
    Case,
    Timeline,
    Agent,
}

impl HandlerCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerCategory::Profile => "profile",
            HandlerCategory::School => "school",
            HandlerCategory::Essay => "essay",
            HandlerCategory::Case => "case",
            HandlerCategory::Timeline => "timeline",
            HandlerCategory::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "profile" => Some(HandlerCategory::Profile),
            "school" => Some(HandlerCategory::School),
            "essay" => Some(HandlerCategory::Essay),
            "case" => Some(HandlerCategory::Case),
            "timeline" => Some(HandlerCategory::Timeline),
            "agent" => Some(HandlerCategory::Agent),
            _ => None,
        }
    }

    /// 该类别支持的方法
    pub fn methods(&self) -> &'static [&'static str] {
        match self {
            HandlerCategory::Profile => &["get", "update"],
            HandlerCategory::School => &["search", "detail", "compare"],
            HandlerCategory::Essay => &["list", "get", "polish"],
            HandlerCategory::Case => &["search"],
            HandlerCategory::Timeline => &["get", "deadlines"],
            HandlerCategory::Agent => &["delegate"],
        }
    }
}

/// 已校验的 handler 引用
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerRef {
    pub category: HandlerCategory,
    pub method: &'static str,
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category.as_str(), self.method)
    }
}

impl FromStr for HandlerRef {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cat, method) = s
            .split_once('.')
            .ok_or_else(|| AgentError::ConfigError(format!("handler must be category.method: {s}")))?;
        let category = HandlerCategory::parse(cat)
            .ok_or_else(|| AgentError::ConfigError(format!("unknown handler category: {cat}")))?;
        let method = category
            .methods()
            .iter()
            .find(|m| **m == method)
            .copied()
            .ok_or_else(|| AgentError::ConfigError(format!("unknown method {method} for category {cat}")))?;
        Ok(HandlerRef { category, method })
    }
}

#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub handler: HandlerRef,
    /// false 表示有副作用，执行器不会自动重试
    pub idempotent: bool,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, parameters: Value, handler: &str) -> Result<Self, AgentError> {
        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            handler: handler.parse()?,
            idempotent: !NON_RETRYABLE_TOOLS.contains(&name),
        })
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// 工具注册表：按名称存储定义，保留注册顺序
#[derive(Default, Debug)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重名是硬错误
    pub fn register(&mut self, def: ToolDefinition) -> Result<(), AgentError> {
        if self.tools.contains_key(&def.name) {
            return Err(AgentError::ConfigError(format!("duplicate tool: {}", def.name)));
        }
        self.order.push(def.name.clone());
        self.tools.insert(def.name.clone(), def);
        Ok(())
    }

    /// 内置的申请领域工具 + delegate
    pub fn with_builtin_tools() -> Result<Self, AgentError> {
        let mut r = Self::new();
        let defs = [
            ToolDefinition::new(
                "get_profile",
                "读取当前学生的申请档案（GPA、语言成绩、背景、目标）",
                parameters_of::<EmptyArgs>(),
                "profile.get",
            )?,
            ToolDefinition::new(
                "update_profile",
                "更新学生档案中的部分字段，只传需要修改的字段",
                parameters_of::<ProfileUpdate>(),
                "profile.update",
            )?,
            ToolDefinition::new(
                "search_schools",
                "按关键词、国家、排名检索院校",
                parameters_of::<SchoolQuery>(),
                "school.search",
            )?,
            ToolDefinition::new(
                "get_school_detail",
                "查看单个院校的详细信息（排名、录取率、学费、项目）",
                parameters_of::<SchoolDetailArgs>(),
                "school.detail",
            )?,
            ToolDefinition::new(
                "compare_schools",
                "并排对比 2-5 所院校",
                parameters_of::<CompareSchoolsArgs>(),
                "school.compare",
            )?,
            ToolDefinition::new(
                "list_essays",
                "列出学生的文书（标题、类型、字数）",
                parameters_of::<EmptyArgs>(),
                "essay.list",
            )?,
            ToolDefinition::new(
                "get_essay",
                "读取一篇文书全文",
                parameters_of::<GetEssayArgs>(),
                "essay.get",
            )?,
            ToolDefinition::new(
                "polish_essay",
                "提交文书润色请求（每次调用都会创建新的润色任务）",
                parameters_of::<PolishEssayArgs>(),
                "essay.polish",
            )?,
            ToolDefinition::new(
                "search_cases",
                "检索往届录取案例",
                parameters_of::<CaseQuery>(),
                "case.search",
            )?,
            ToolDefinition::new(
                "get_timeline",
                "查看学生的全部申请时间节点",
                parameters_of::<EmptyArgs>(),
                "timeline.get",
            )?,
            ToolDefinition::new(
                "get_deadlines",
                "查看未来若干天内尚未完成的截止日期",
                parameters_of::<GetDeadlinesArgs>(),
                "timeline.deadlines",
            )?,
            ToolDefinition::new(
                DELEGATE_TOOL,
                "把任务交给另一位专家 Agent 处理",
                parameters_of::<DelegateArgs>(),
                "agent.delegate",
            )?,
        ];
        for def in defs {
            r.register(def)?;
        }
        Ok(r)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// 按给定名称顺序返回 schema，忽略未注册的名称
    pub fn schemas_for<S: AsRef<str>>(&self, names: &[S]) -> Vec<ToolSchema> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n.as_ref()))
            .map(ToolDefinition::schema)
            .collect()
    }

    /// 未注册的工具视为不可重试
    pub fn is_retryable(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|d| d.idempotent)
    }

    /// 全部工具 schema 的 JSON（调试与 /api 文档用）
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<ToolSchema> = self
            .order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(ToolDefinition::schema)
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
