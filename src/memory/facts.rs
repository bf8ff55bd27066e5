//! 用户消息中的申请事实抽取（GPA、语言成绩、目标国家、专业、申请季）
//!
//! 纯正则抽取，不调用模型；结果合并进会话 context["facts"]，后出现的值覆盖先前的值。

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpa: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toefl: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ielts: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gre: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmat: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_countries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
}

impl ExtractedFacts {
    pub fn is_empty(&self) -> bool {
        *self == ExtractedFacts::default()
    }

    /// 用 newer 中出现的字段覆盖当前值；国家列表取并集
    pub fn merge(&mut self, newer: ExtractedFacts) {
        macro_rules! take {
            ($($f:ident),*) => { $(if newer.$f.is_some() { self.$f = newer.$f; })* };
        }
        take!(gpa, toefl, ielts, gre, gmat, major, season);
        for c in newer.target_countries {
            if !self.target_countries.contains(&c) {
                self.target_countries.push(c);
            }
        }
    }

    /// 供 system prompt 使用的一行摘要
    pub fn summary_line(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(v) = self.gpa {
            parts.push(format!("GPA {v}"));
        }
        if let Some(v) = self.toefl {
            parts.push(format!("TOEFL {v}"));
        }
        if let Some(v) = self.ielts {
            parts.push(format!("IELTS {v}"));
        }
        if let Some(v) = self.gre {
            parts.push(format!("GRE {v}"));
        }
        if let Some(v) = self.gmat {
            parts.push(format!("GMAT {v}"));
        }
        if !self.target_countries.is_empty() {
            parts.push(format!("目标国家 {}", self.target_countries.join("/")));
        }
        if let Some(v) = &self.major {
            parts.push(format!("专业方向 {v}"));
        }
        if let Some(v) = &self.season {
            parts.push(format!("申请季 {v}"));
        }
        (!parts.is_empty()).then(|| parts.join("，"))
    }
}

/// (匹配模式, 规范名)
const COUNTRIES: &[(&str, &str)] = &[
    (r"美国|\bUSA?\b|United States|America", "US"),
    (r"英国|\bUK\b|United Kingdom|Britain", "UK"),
    (r"加拿大|Canada", "CA"),
    (r"澳大利亚|澳洲|Australia", "AU"),
    (r"香港|Hong Kong", "HK"),
    (r"新加坡|Singapore", "SG"),
    (r"德国|Germany", "DE"),
    (r"日本|Japan", "JP"),
];

const MAJORS: &[(&str, &str)] = &[
    (r"计算机|(?i:computer science)|\bCS\b", "计算机科学"),
    (r"数据科学|(?i:data science)", "数据科学"),
    (r"电子工程|电气|\bEE\b", "电子工程"),
    (r"金融|(?i:finance)", "金融"),
    (r"商业分析|(?i:business analytics)", "商业分析"),
    (r"经济|(?i:economics)", "经济学"),
    (r"会计|(?i:accounting)", "会计"),
    (r"机械|(?i:mechanical engineering)", "机械工程"),
    (r"(?i:\bMBA\b)", "MBA"),
    (r"传媒|(?i:media)", "传媒"),
    (r"教育|(?i:education)", "教育学"),
];

fn compile_table(table: &[(&str, &'static str)]) -> Result<Vec<(Regex, &'static str)>, regex::Error> {
    table
        .iter()
        .map(|(p, name)| Regex::new(p).map(|r| (r, *name)))
        .collect()
}

pub struct FactExtractor {
    gpa: Regex,
    toefl: Regex,
    ielts: Regex,
    gre: Regex,
    gmat: Regex,
    season: Regex,
    countries: Vec<(Regex, &'static str)>,
    majors: Vec<(Regex, &'static str)>,
}

impl FactExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            gpa: Regex::new(r"(?i)(?:GPA|绩点|均分)\s*(?:是|为|有|:|：)?\s*(\d{1,3}(?:\.\d{1,2})?)")?,
            toefl: Regex::new(r"(?i)(?:TOEFL|托福)\s*(?:是|考了|为|:|：)?\s*(\d{2,3})")?,
            ielts: Regex::new(r"(?i)(?:IELTS|雅思)\s*(?:是|考了|为|:|：)?\s*(\d(?:\.\d)?)")?,
            gre: Regex::new(r"(?i)GRE\s*(?:是|考了|为|:|：)?\s*(\d{3})")?,
            gmat: Regex::new(r"(?i)GMAT\s*(?:是|考了|为|:|：)?\s*(\d{3})")?,
            season: Regex::new(r"(?i)(20\d{2})\s*(fall|spring|秋季|春季|秋|春)")?,
            countries: compile_table(COUNTRIES)?,
            majors: compile_table(MAJORS)?,
        })
    }

    pub fn extract(&self, text: &str) -> ExtractedFacts {
        let num = |re: &Regex| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());

        let mut facts = ExtractedFacts {
            gpa: num(&self.gpa).and_then(|s| s.parse().ok()),
            toefl: num(&self.toefl)
                .and_then(|s| s.parse().ok())
                .filter(|v: &u16| *v <= 120),
            ielts: num(&self.ielts)
                .and_then(|s| s.parse().ok())
                .filter(|v: &f32| *v <= 9.0),
            gre: num(&self.gre)
                .and_then(|s| s.parse().ok())
                .filter(|v: &u16| (260..=340).contains(v)),
            gmat: num(&self.gmat)
                .and_then(|s| s.parse().ok())
                .filter(|v: &u16| (200..=805).contains(v)),
            ..Default::default()
        };

        if let Some(c) = self.season.captures(text) {
            let year = c.get(1).map_or("", |m| m.as_str());
            let term = match c.get(2).map(|m| m.as_str().to_lowercase()).as_deref() {
                Some("spring") | Some("春季") | Some("春") => "Spring",
                _ => "Fall",
            };
            facts.season = Some(format!("{year}{term}"));
        }

        for (re, name) in &self.countries {
            if re.is_match(text) && !facts.target_countries.iter().any(|c| c == name) {
                facts.target_countries.push((*name).to_string());
            }
        }
        facts.major = self
            .majors
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, name)| (*name).to_string());
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_scores_in_chinese() {
        let ex = FactExtractor::new().unwrap();
        let f = ex.extract("我的GPA是3.75，托福考了105，GRE 325，想申请美国的计算机硕士，2026秋季入学");
        assert_eq!(f.gpa, Some(3.75));
        assert_eq!(f.toefl, Some(105));
        assert_eq!(f.gre, Some(325));
        assert_eq!(f.target_countries, vec!["US".to_string()]);
        assert_eq!(f.major.as_deref(), Some("计算机科学"));
        assert_eq!(f.season.as_deref(), Some("2026Fall"));
    }

    #[test]
    fn test_extract_english_and_out_of_range() {
        let ex = FactExtractor::new().unwrap();
        let f = ex.extract("IELTS 7.5, TOEFL 150, targeting UK and Canada for finance, 2027 spring");
        assert_eq!(f.ielts, Some(7.5));
        assert_eq!(f.toefl, None);
        assert_eq!(f.target_countries, vec!["UK".to_string(), "CA".to_string()]);
        assert_eq!(f.major.as_deref(), Some("金融"));
        assert_eq!(f.season.as_deref(), Some("2027Spring"));
    }

    #[test]
    fn test_merge_overrides_and_unions() {
        let ex = FactExtractor::new().unwrap();
        let mut facts = ex.extract("GPA 3.5, 想去英国");
        facts.merge(ex.extract("GPA为3.6，也考虑香港"));
        assert_eq!(facts.gpa, Some(3.6));
        assert_eq!(facts.target_countries, vec!["UK".to_string(), "HK".to_string()]);
        assert!(ex.extract("你好").is_empty());
    }
}
