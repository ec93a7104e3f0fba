use std::fmt::Write as _;

use chrono::{DateTime, Local};

use super::config::NotifyConfig;
use super::dispatcher::MarkdownMessage;
use crate::workflows::candidates::CandidateRecord;

const REPLY_HINT: &str = "💡 回复序号查看详情，如：`1` 或 `1,2,3`";

pub fn grade_emoji(grade: &str) -> &'static str {
    match grade {
        "A" => "🌟",
        "B" => "✨",
        "C" => "⭐",
        "D" => "💫",
        _ => "📄",
    }
}

/// Markdown robots only notify mentioned users when their ids also appear in the text.
fn push_mentions(text: &mut String, at_user_ids: &[String]) {
    if at_user_ids.is_empty() {
        return;
    }
    text.push('\n');
    for id in at_user_ids.iter().filter(|id| !id.is_empty()) {
        let _ = write!(text, "@{id} ");
    }
}

/// Scheduled and manual pushes.
pub fn pending_list(candidates: &[CandidateRecord], at_user_ids: &[String]) -> MarkdownMessage {
    let mut text = String::from("## 📋 待面试候选人列表\n\n");
    let _ = write!(text, "> 共 **{}** 位候选人待处理\n\n", candidates.len());

    for (index, candidate) in candidates.iter().enumerate() {
        let _ = writeln!(
            text,
            "**{}. {}** {}",
            index + 1,
            candidate.name,
            grade_emoji(&candidate.grade)
        );
        let _ = writeln!(
            text,
            "- 评分: **{:.1}** 分 | 评级: **{}**",
            candidate.total_score, candidate.grade
        );
        let _ = writeln!(
            text,
            "- JD匹配: {}% | 状态: {}",
            candidate.jd_match,
            candidate.status.label()
        );
        let _ = write!(text, "- 建议: {}\n\n", candidate.recommendation);
    }

    text.push_str("---\n");
    let _ = write!(text, "{REPLY_HINT}\n\n");
    push_mentions(&mut text, at_user_ids);

    MarkdownMessage {
        title: "📋 待面试候选人列表".to_string(),
        text,
    }
}

/// Results of a finished batch, ranked, as pushed automatically on completion.
pub fn evaluation_result(
    candidates: &[CandidateRecord],
    at_user_ids: &[String],
) -> MarkdownMessage {
    let title = "🔔 评估完成自动通知";
    let intro = format!(
        "> 本次评估完成 **{}** 位候选人，以下是评估结果：\n\n",
        candidates.len()
    );

    let mut text = format!("## {title}\n\n{intro}");
    for (index, candidate) in candidates.iter().enumerate() {
        let _ = writeln!(
            text,
            "**{}. {}** {}",
            index + 1,
            candidate.name,
            grade_emoji(&candidate.grade)
        );
        let _ = writeln!(
            text,
            "- 评分: **{:.1}** 分 | 评级: **{}**",
            candidate.total_score, candidate.grade
        );
        let _ = writeln!(text, "- JD匹配: {}%", candidate.jd_match);
        let _ = write!(text, "- 建议: {}\n\n", candidate.recommendation);
    }

    text.push_str("---\n");
    let _ = write!(text, "{REPLY_HINT}\n\n");
    push_mentions(&mut text, at_user_ids);

    MarkdownMessage {
        title: title.to_string(),
        text,
    }
}

/// Reply to a single selected number.
pub fn candidate_detail(candidate: &CandidateRecord) -> MarkdownMessage {
    let d = &candidate.dimensions;
    let mut text = format!("## 👤 {}\n\n", candidate.name);

    text.push_str("### 📊 综合评分\n");
    let _ = writeln!(text, "- **总分**: {:.1} 分", candidate.total_score);
    let _ = writeln!(
        text,
        "- **评级**: {} {}",
        candidate.grade,
        grade_emoji(&candidate.grade)
    );
    let _ = writeln!(text, "- **JD匹配度**: {}%", candidate.jd_match);
    let _ = write!(text, "- **录用建议**: {}\n\n", candidate.recommendation);

    text.push_str("### 📈 各维度得分\n");
    let _ = writeln!(text, "- **年龄**: {}/10 - {}", d.age.score, d.age.reason);
    let _ = writeln!(
        text,
        "- **工作经验**: {}/25 - {}",
        d.experience.score, d.experience.reason
    );
    let _ = writeln!(
        text,
        "- **学历背景**: {}/20 - {}",
        d.education.score, d.education.reason
    );
    let _ = writeln!(
        text,
        "- **公司背景**: {}/15 - {}",
        d.company.score, d.company.reason
    );
    let _ = writeln!(text, "- **技术能力**: {}/25 - {}", d.tech.score, d.tech.reason);
    let _ = write!(
        text,
        "- **项目经验**: {}/15 - {}\n\n",
        d.project.score, d.project.reason
    );

    text.push_str("### 📝 状态信息\n");
    let _ = writeln!(text, "- **当前状态**: {}", candidate.status.label());
    if !candidate.notes.is_empty() {
        let _ = writeln!(text, "- **备注**: {}", candidate.notes);
    }
    let _ = writeln!(text, "- **创建时间**: {}", candidate.created_label());

    MarkdownMessage {
        title: format!("候选人详情 - {}", candidate.name),
        text,
    }
}

/// Reply to several selected numbers, numbered in selection order.
pub fn candidates_summary(candidates: &[CandidateRecord]) -> MarkdownMessage {
    let mut text = format!("## 📋 候选人汇总（共{}人）\n\n", candidates.len());

    for (index, candidate) in candidates.iter().enumerate() {
        let d = &candidate.dimensions;
        let _ = write!(
            text,
            "### {}. {} {}\n\n",
            index + 1,
            candidate.name,
            grade_emoji(&candidate.grade)
        );
        let _ = writeln!(
            text,
            "- **总分**: {:.1} 分 | **评级**: {}",
            candidate.total_score, candidate.grade
        );
        let _ = writeln!(
            text,
            "- **JD匹配**: {}% | **状态**: {}",
            candidate.jd_match,
            candidate.status.label()
        );
        let _ = writeln!(text, "- **建议**: {}", candidate.recommendation);
        let _ = writeln!(
            text,
            "- **得分明细**: 年龄{} | 经验{} | 学历{} | 公司{} | 技术{} | 项目{}",
            d.age.score,
            d.experience.score,
            d.education.score,
            d.company.score,
            d.tech.score,
            d.project.score
        );
        if index + 1 < candidates.len() {
            text.push_str("\n---\n\n");
        }
    }
    text.push_str("\n\n💡 **提示**: 回复单个序号可查看详细信息");

    MarkdownMessage {
        title: format!("候选人汇总 - 共{}人", candidates.len()),
        text,
    }
}

pub fn test_message(config: &NotifyConfig, sent_at: DateTime<Local>) -> MarkdownMessage {
    let state = if config.enabled { "已启用" } else { "未启用" };
    let text = format!(
        "## 🧪 测试消息\n\n这是一条来自简历评估系统的测试消息\n\n- 发送时间: {}\n- 配置状态: {}\n- 推送时间: {}\n- 推送数量: {}人\n\n✅ 如果您看到这条消息，说明钉钉机器人配置成功！",
        sent_at.format("%Y-%m-%d %H:%M:%S"),
        state,
        config.schedule,
        config.push_limit,
    );
    MarkdownMessage {
        title: "测试消息".to_string(),
        text,
    }
}
