//! 文本工具调用协议
//!
//! 对只返回文本的端点：把工具 schema 拼进 system prompt，再从回复中提取 JSON 工具调用。
//! 支持 `{"tool_calls": [{"name": "...", "arguments": {...}}]}` 与单个 `{"tool": "...", "args": {...}}` 两种写法。

use serde::Deserialize;

use crate::llm::ToolSchema;
use crate::memory::ToolCall;

#[derive(Deserialize)]
struct WireCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct WireCalls {
    tool_calls: Vec<WireCall>,
}

#[derive(Deserialize)]
struct WireSingle {
    tool: String,
    #[serde(default)]
    args: serde_json::Value,
}

/// 生成 system prompt 中的「可用工具」段落
pub fn tools_prompt_section(tools: &[ToolSchema]) -> String {
    if tools.is_empty() {
        return String::new();
    }
    let schema = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
    format!(
        "\n\n## Available tools\n{schema}\n\n\
         需要调用工具时，只输出一个 JSON 对象，不要输出其它文字：\
         {{\"tool_calls\": [{{\"name\": \"工具名\", \"arguments\": {{...}}}}]}}。\
         不需要工具时，直接用自然语言回答。"
    )
}

/// 从模型输出中提取 JSON 片段（```json 代码块或首个 `{` 到最后一个 `}`）
fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析模型输出：含合法工具调用 JSON 时返回调用列表，否则返回 None（视为普通回复）
pub fn parse_tool_calls(output: &str) -> Option<Vec<ToolCall>> {
    let json = extract_json(output)?;
    if let Ok(calls) = serde_json::from_str::<WireCalls>(json) {
        let calls: Vec<ToolCall> = calls
            .tool_calls
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| ToolCall::new(c.name, normalize_args(c.arguments)))
            .collect();
        return (!calls.is_empty()).then_some(calls);
    }
    let single = serde_json::from_str::<WireSingle>(json).ok()?;
    if single.tool.is_empty() {
        return None;
    }
    Some(vec![ToolCall::new(single.tool, normalize_args(single.args))])
}

/// 参数缺省为空对象；字符串形式的 JSON 参数再解析一次
fn normalize_args(args: serde_json::Value) -> serde_json::Value {
    match args {
        serde_json::Value::Null => serde_json::json!({}),
        serde_json::Value::String(s) => {
            serde_json::from_str(&s).unwrap_or_else(|_| serde_json::json!({ "input": s }))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_calls_array() {
        let out = r#"{"tool_calls": [{"name": "search_schools", "arguments": {"country": "US"}}]}"#;
        let calls = parse_tool_calls(out).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search_schools");
        assert_eq!(calls[0].arguments["country"], "US");
    }

    #[test]
    fn test_parse_single_tool_in_code_block() {
        let out = "好的，我来查一下。\n```json\n{\"tool\": \"get_profile\", \"args\": null}\n```";
        let calls = parse_tool_calls(out).unwrap();
        assert_eq!(calls[0].name, "get_profile");
        assert!(calls[0].arguments.is_object());
    }

    #[test]
    fn test_plain_text_is_not_a_tool_call() {
        assert!(parse_tool_calls("建议你先准备托福，再考虑选校。").is_none());
        assert!(parse_tool_calls("GPA 范围通常写作 {3.5-3.8}").is_none());
    }

    #[test]
    fn test_string_arguments_are_decoded() {
        let out = r#"{"tool_calls": [{"name": "get_school_detail", "arguments": "{\"school_id\": \"mit\"}"}]}"#;
        let calls = parse_tool_calls(out).unwrap();
        assert_eq!(calls[0].arguments["school_id"], "mit");
    }

    #[test]
    fn test_tools_section_empty_without_tools() {
        assert!(tools_prompt_section(&[]).is_empty());
    }
}
