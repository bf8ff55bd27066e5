//! 回复语言：按消息内容识别，决定固定回复与降级文案使用中文还是英文

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Zh,
    En,
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}' | '\u{f900}'..='\u{faff}')
}

impl Locale {
    /// 含中日韩统一表意文字则为中文；否则含 ASCII 字母为英文；都没有时默认中文
    pub fn detect(text: &str) -> Self {
        if text.chars().any(is_cjk) {
            Locale::Zh
        } else if text.chars().any(|c| c.is_ascii_alphabetic()) {
            Locale::En
        } else {
            Locale::Zh
        }
    }

    /// 接受 zh / zh-CN / en / en-US 等写法
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        if lower == "zh" || lower.starts_with("zh-") || lower.starts_with("zh_") {
            Some(Locale::Zh)
        } else if lower == "en" || lower.starts_with("en-") || lower.starts_with("en_") {
            Some(Locale::En)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::Zh => "zh",
            Locale::En => "en",
        }
    }

    pub fn pick<'a>(&self, zh: &'a str, en: &'a str) -> &'a str {
        match self {
            Locale::Zh => zh,
            Locale::En => en,
        }
    }
}
