use chrono::{DateTime, Local};
use serde_json::{Map, Value};

use super::evaluator::WorkflowReport;
use crate::workflows::candidates::{CandidateDraft, DimensionScore, DimensionScores, OwnerId};

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("evaluation report is missing")]
    MissingReport,
    #[error("report has neither output nor result text")]
    EmptyReport,
    #[error("failed to parse report JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("report section JD匹配度 not found")]
    MissingJdMatch,
}

/// Structured view of a workflow report.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreCard {
    pub total_score: f64,
    pub grade: String,
    pub jd_match: i32,
    pub jd_summary: String,
    pub matched_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub education: String,
    pub experience: String,
    pub dimensions: DimensionScores,
    pub conclusion: Option<String>,
    pub overall_pass: bool,
    pub recommendation: String,
    /// Cleaned report JSON kept alongside the record.
    pub report_json: String,
}

/// Rule used when the report carries no explicit hiring conclusion.
pub fn fallback_recommendation(age_score: i32, jd_match: i32, overall_pass: bool) -> &'static str {
    if age_score == 0 {
        return "不推荐（年龄黑名单）";
    }
    if jd_match >= 70 && overall_pass {
        return "推荐";
    }
    if jd_match >= 50 || overall_pass {
        return "待定";
    }
    "不推荐"
}

/// Strip markdown fences and close any brackets left open by a truncated response.
pub fn clean_report_json(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    if text.is_empty() || serde_json::from_str::<Value>(text).is_ok() {
        return text.to_string();
    }
    repair_truncated(text)
}

fn repair_truncated(text: &str) -> String {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                closers.pop();
            }
            _ => {}
        }
    }

    let mut repaired = text.to_string();
    if in_string {
        if escaped {
            repaired.pop();
        }
        repaired.push('"');
    }
    let trimmed_len = repaired
        .trim_end_matches(|ch: char| ch == ',' || ch == ':' || ch.is_whitespace())
        .len();
    repaired.truncate(trimmed_len);
    while let Some(closer) = closers.pop() {
        repaired.push(closer);
    }
    repaired
}

fn section<'a>(document: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    document.get(key).and_then(Value::as_object)
}

fn text(map: Option<&Map<String, Value>>, key: &str) -> String {
    map.and_then(|map| map.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn number(map: Option<&Map<String, Value>>, key: &str) -> Option<f64> {
    map.and_then(|map| map.get(key)).and_then(Value::as_f64)
}

fn strings(map: Option<&Map<String, Value>>, key: &str) -> Vec<String> {
    map.and_then(|map| map.get(key))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn dimension(scores: Option<&Map<String, Value>>, key: &str) -> DimensionScore {
    let entry = scores.and_then(|scores| scores.get(key)).and_then(Value::as_object);
    DimensionScore {
        score: number(entry, "得分").unwrap_or_default() as i32,
        reason: text(entry, "说明"),
    }
}

/// Parse the workflow report into a score card. An absent report is an error: the batch
/// surfaces it on the item instead of persisting an empty evaluation.
pub fn score_report(report: Option<&WorkflowReport>) -> Result<ScoreCard, ScoringError> {
    let report = report.ok_or(ScoringError::MissingReport)?;
    let raw = report.text().ok_or(ScoringError::EmptyReport)?;
    let cleaned = clean_report_json(raw);
    let document: Value = serde_json::from_str(&cleaned)?;

    let jd = section(&document, "JD匹配度").ok_or(ScoringError::MissingJdMatch)?;
    let basic = section(&document, "基本信息");
    let scores = section(&document, "各维度得分");
    let verdict = section(&document, "录用建议");

    let dimensions = DimensionScores {
        age: dimension(scores, "年龄"),
        experience: dimension(scores, "工作经验"),
        education: dimension(scores, "学历背景"),
        company: dimension(scores, "公司背景"),
        tech: dimension(scores, "技术能力"),
        project: dimension(scores, "项目经历"),
    };

    let conclusion = Some(text(verdict, "结论")).filter(|value| !value.is_empty());
    let overall_pass = match verdict.and_then(|map| map.get("结论")).and_then(Value::as_str) {
        Some(value) => value == "建议录用" || value == "推荐",
        None => true,
    };
    let jd_match = number(Some(jd), "匹配分数").unwrap_or_default() as i32;
    let recommendation = conclusion.clone().unwrap_or_else(|| {
        fallback_recommendation(dimensions.age.score, jd_match, overall_pass).to_string()
    });

    Ok(ScoreCard {
        total_score: number(basic, "最终得分").unwrap_or_default(),
        grade: text(basic, "评级"),
        jd_match,
        jd_summary: text(Some(jd), "匹配总结"),
        matched_skills: strings(Some(jd), "匹配的技能"),
        missing_skills: strings(Some(jd), "缺失的技能"),
        education: text(basic, "学历"),
        experience: text(basic, "工作经验"),
        dimensions,
        conclusion,
        overall_pass,
        recommendation,
        report_json: cleaned,
    })
}

impl ScoreCard {
    pub fn report_markdown(&self, candidate: &str, filename: &str, generated_at: DateTime<Local>) -> String {
        let d = &self.dimensions;
        let lines = [
            format!("# {candidate} - 简历评估报告"),
            format!("> 生成时间：{}", generated_at.format("%Y-%m-%d %H:%M:%S")),
            format!("> 候选人：{candidate}"),
            format!("> 简历文件：{filename}"),
            String::new(),
            "## 📊 综合评分".to_string(),
            format!("- 年龄: {}/10", d.age.score),
            format!("- 经验: {}/25", d.experience.score),
            format!("- 学历: {}/20", d.education.score),
            format!("- 公司: {}/15", d.company.score),
            format!("- 技术: {}/25", d.tech.score),
            format!("- 项目: {}/15", d.project.score),
            format!("- 总分: {:.1}  评级: {}", self.total_score, self.grade),
            String::new(),
            "## 🎯 JD匹配度分析".to_string(),
            format!("- 匹配分数：{}/100", self.jd_match),
            format!("- 匹配技能: {}", self.matched_skills.join("、")),
            format!("- 缺失技能: {}", self.missing_skills.join("、")),
            format!("- 匹配总结: {}", self.jd_summary),
            String::new(),
            "## ✅ 用人标准评估".to_string(),
            format!("- 学历: {}", self.education),
            format!("- 工作经验: {}", self.experience),
            format!("- 综合结果: {}", if self.overall_pass { "通过" } else { "未通过" }),
            String::new(),
            "## 📌 最终建议".to_string(),
            format!("推荐结果：{}", self.recommendation),
        ];
        lines.join("\n")
    }

    pub fn into_draft(
        self,
        owner: OwnerId,
        apply_id: &str,
        name: &str,
        filename: &str,
        generated_at: DateTime<Local>,
    ) -> CandidateDraft {
        let report_markdown = self.report_markdown(name, filename, generated_at);
        CandidateDraft {
            owner,
            apply_id: apply_id.to_string(),
            name: name.to_string(),
            filename: filename.to_string(),
            total_score: self.total_score,
            grade: self.grade,
            jd_match: self.jd_match,
            dimensions: self.dimensions,
            recommendation: self.recommendation,
            report_markdown,
            report_json: self.report_json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_report(conclusion: Option<&str>) -> String {
        let mut document = json!({
            "基本信息": { "姓名": "赵六", "最终得分": 86.5, "评级": "A", "学历": "硕士", "工作经验": "5年" },
            "JD匹配度": {
                "匹配分数": 78,
                "匹配总结": "后端经验匹配",
                "匹配的技能": ["Rust", "Kafka"],
                "缺失的技能": ["K8s"],
            },
            "各维度得分": {
                "年龄": { "得分": 8, "说明": "30岁" },
                "工作经验": { "得分": 20, "说明": "5年" },
                "学历背景": { "得分": 18, "说明": "985硕士" },
                "公司背景": { "得分": 12, "说明": "一线大厂" },
                "技术能力": { "得分": 21, "说明": "扎实" },
                "项目经历": { "得分": 11, "说明": "主导过交易系统" },
            },
        });
        if let Some(conclusion) = conclusion {
            document["录用建议"] = json!({ "结论": conclusion });
        }
        document.to_string()
    }

    #[test]
    fn parses_scores_and_explicit_conclusion() {
        let report = WorkflowReport::from_output(sample_report(Some("建议录用")));
        let card = score_report(Some(&report)).expect("report scores");

        assert_eq!(card.total_score, 86.5);
        assert_eq!(card.grade, "A");
        assert_eq!(card.jd_match, 78);
        assert_eq!(card.dimensions.project.score, 11);
        assert_eq!(card.dimensions.education.reason, "985硕士");
        assert_eq!(card.matched_skills, vec!["Rust", "Kafka"]);
        assert_eq!(card.recommendation, "建议录用");
        assert!(card.overall_pass);
    }

    #[test]
    fn derives_recommendation_without_conclusion() {
        let report = WorkflowReport::from_output(sample_report(None));
        let card = score_report(Some(&report)).expect("report scores");
        assert_eq!(card.recommendation, "推荐");
    }

    #[test]
    fn fallback_rule_covers_each_band() {
        assert_eq!(fallback_recommendation(0, 95, true), "不推荐（年龄黑名单）");
        assert_eq!(fallback_recommendation(6, 70, true), "推荐");
        assert_eq!(fallback_recommendation(6, 55, false), "待定");
        assert_eq!(fallback_recommendation(6, 20, true), "待定");
        assert_eq!(fallback_recommendation(6, 20, false), "不推荐");
    }

    #[test]
    fn missing_report_is_an_error() {
        assert!(matches!(score_report(None), Err(ScoringError::MissingReport)));
        let empty = WorkflowReport::default();
        assert!(matches!(score_report(Some(&empty)), Err(ScoringError::EmptyReport)));
    }

    #[test]
    fn report_without_jd_section_is_rejected() {
        let report = WorkflowReport::from_output(json!({ "基本信息": {} }).to_string());
        assert!(matches!(
            score_report(Some(&report)),
            Err(ScoringError::MissingJdMatch)
        ));
    }

    #[test]
    fn strips_code_fences() {
        let cleaned = clean_report_json("```json\n{\"a\": 1}\n```");
        assert_eq!(cleaned, "{\"a\": 1}");
    }

    #[test]
    fn closes_truncated_objects_in_order() {
        let cleaned = clean_report_json("{\"JD匹配度\": {\"匹配的技能\": [\"Rust\", \"Go");
        let value: Value = serde_json::from_str(&cleaned).expect("repaired JSON parses");
        assert_eq!(value["JD匹配度"]["匹配的技能"][1], "Go");
    }

    #[test]
    fn drops_dangling_separators_before_closing() {
        let cleaned = clean_report_json("{\"基本信息\": {\"评级\": \"B\",");
        let value: Value = serde_json::from_str(&cleaned).expect("repaired JSON parses");
        assert_eq!(value["基本信息"]["评级"], "B");
    }
}
