//! Agent system prompt 模板与拼装
//!
//! 模板可被 config/prompts/<agent>.txt 覆盖（见 core::builder）；拼装时追加语言要求、委派说明与会话上下文。

use crate::agent::{AgentConfig, AgentType};
use crate::routing::Locale;

pub const ORCHESTRATOR: &str = "你是一名资深留学申请顾问，负责理解学生的问题并给出整体建议。\
当问题明显属于某个专业领域（档案评估、选校、文书、录取案例、申请时间规划）时，使用 delegate 工具交给对应的专家处理；\
简单的综合性问题可以直接回答。回答要具体、务实，不要编造院校数据。";

pub const PROFILE: &str = "你是留学档案分析师，负责评估学生的学术背景（GPA、语言成绩、GRE/GMAT、科研与实习经历）。\
先用 get_profile 查看档案；学生提供了新的成绩或经历时，用 update_profile 更新。\
指出背景的优势与短板，并给出可执行的提升建议。";

pub const SCHOOL: &str = "你是选校顾问，根据学生背景推荐冲刺、匹配、保底三档院校。\
使用 search_schools、get_school_detail、compare_schools 查询真实数据，不要凭记忆编造排名或录取率。\
需要参考往届录取情况时，可以委派给案例分析师。";

pub const ESSAY: &str = "你是文书导师，帮助学生构思、修改和润色个人陈述（PS/SOP）、推荐信和简历。\
用 list_essays、get_essay 查看学生已有的文书；学生明确要求润色时才调用 polish_essay。\
反馈要指向具体段落，说明问题并给出修改示例。";

pub const CASE: &str = "你是录取案例分析师，使用 search_cases 查找与学生背景相近的往届案例，\
总结录取与被拒的共同点，帮助学生判断自己的竞争力。不要透露案例中的个人身份信息。";

pub const TIMELINE: &str = "你是申请时间规划师，使用 get_timeline、get_deadlines 查看学生的申请节点与截止日期，\
按时间倒推给出分阶段的准备计划（语言考试、文书、推荐信、网申递交），并提醒临近的截止日期。";

/// 拼装完整 system prompt
pub fn build_system_prompt(
    template: &str,
    config: &AgentConfig,
    context_summary: &str,
    locale: Locale,
) -> String {
    let mut prompt = String::with_capacity(template.len() + context_summary.len() + 256);
    prompt.push_str(template);
    prompt.push_str("\n\n");
    prompt.push_str(locale.pick(
        "请使用中文回答。",
        "Please answer in English.",
    ));
    prompt.push('\n');

    if !config.can_delegate_to.is_empty() {
        let targets: Vec<String> = config
            .can_delegate_to
            .iter()
            .map(|a| format!("{}（{}）", a.as_str(), a.display_name()))
            .collect();
        prompt.push_str(&format!(
            "\n如需其他专家处理，调用 delegate 工具，可选目标：{}。\n",
            targets.join("、")
        ));
    }

    if !context_summary.trim().is_empty() {
        prompt.push_str("\n# 学生上下文\n");
        prompt.push_str(context_summary.trim_end());
        prompt.push('\n');
    }
    prompt
}

/// 委派后追加到会话中的系统说明
pub fn delegation_note(from: AgentType, to: AgentType, task: &str, reason: Option<&str>) -> String {
    match reason {
        Some(r) if !r.is_empty() => format!(
            "[{} → {}] 委派任务：{}（原因：{}）",
            from.display_name(),
            to.display_name(),
            task,
            r
        ),
        _ => format!("[{} → {}] 委派任务：{}", from.display_name(), to.display_name(), task),
    }
}
