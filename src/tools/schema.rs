//! 工具参数结构与 JSON Schema 生成（schemars 自动生成，不手写 schema）
//!
//! 参数结构同时用于反序列化模型给出的 arguments，保证 schema 与解析一致。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::handlers::ToolError;

/// 无参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct EmptyArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchoolDetailArgs {
    /// 院校 ID
    pub school_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompareSchoolsArgs {
    /// 要对比的院校 ID（2-5 个）
    pub school_ids: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetEssayArgs {
    /// 文书 ID
    pub essay_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolishEssayArgs {
    /// 文书 ID
    pub essay_id: String,
    /// 润色重点，如「语言流畅度」「突出科研经历」
    pub focus: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetDeadlinesArgs {
    /// 未来多少天内，默认 60
    pub within_days: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DelegateArgs {
    /// 目标 Agent：profile / school / essay / case / timeline / orchestrator
    pub target: String,
    /// 交给目标 Agent 的具体任务
    pub task: String,
    /// 委派原因
    pub reason: Option<String>,
}

/// 参数结构的 JSON Schema（去掉 $schema 元字段）
pub fn parameters_of<T: JsonSchema>() -> Value {
    let mut v = serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = v.as_object_mut() {
        obj.remove("$schema");
    }
    v
}

/// 把模型给出的 arguments 解析为参数结构；null 视为空对象
pub fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    let v = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args.clone()
    };
    serde_json::from_value(v).map_err(|e| ToolError::Invalid(e.to_string()))
}
