use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use super::session::PushSessionStore;
use crate::workflows::candidates::{CandidateId, CandidateRecord, CandidateRepository};

const DELIMITERS: &[char] = &[',', '，', '、', '；', ';', '/', '|', '\t', '。', '：', ':'];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    #[error("暂无候选人列表，请先推送候选人")]
    NoSession,
    #[error("序号 {} 超出范围，请输入 1-{len}", join_numbers(.invalid))]
    OutOfRange { invalid: Vec<i64>, len: usize },
    #[error("未找到候选人信息")]
    NotFound,
}

fn join_numbers(numbers: &[i64]) -> String {
    numbers
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join("、")
}

/// Selection numbers in first-seen order, duplicates and non-numeric tokens dropped. Zero and
/// negative numbers are kept so range validation can report them.
pub fn parse_selection(text: &str) -> Vec<i64> {
    let normalised: String = text
        .chars()
        .map(|ch| if DELIMITERS.contains(&ch) { ' ' } else { ch })
        .collect();

    let mut seen = HashSet::new();
    normalised
        .split_whitespace()
        .filter_map(|token| token.parse::<i64>().ok())
        .filter(|number| seen.insert(*number))
        .collect()
}

/// Candidates picked by a reply, in the order they were asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub session_id: String,
    pub candidates: Vec<CandidateRecord>,
}

impl Resolution {
    pub fn candidate_ids(&self) -> Vec<CandidateId> {
        self.candidates.iter().map(|record| record.id).collect()
    }
}

/// Maps numeric replies onto the current push session.
pub struct ReplyCorrelator<R> {
    repository: Arc<R>,
    sessions: Arc<PushSessionStore>,
}

impl<R> ReplyCorrelator<R>
where
    R: CandidateRepository + 'static,
{
    pub fn new(repository: Arc<R>, sessions: Arc<PushSessionStore>) -> Self {
        Self {
            repository,
            sessions,
        }
    }

    /// `Ok(None)` when the text holds no numbers at all.
    pub fn resolve(&self, text: &str) -> Result<Option<Resolution>, ReplyError> {
        let numbers = parse_selection(text.trim());
        if numbers.is_empty() {
            info!(content = text, "reply carries no selection; ignoring");
            return Ok(None);
        }

        let session = self.sessions.current().ok_or(ReplyError::NoSession)?;
        let len = session.candidate_ids.len();
        let invalid: Vec<i64> = numbers
            .iter()
            .copied()
            .filter(|number| *number < 1 || *number as usize > len)
            .collect();
        if !invalid.is_empty() {
            return Err(ReplyError::OutOfRange { invalid, len });
        }

        let mut candidates = Vec::with_capacity(numbers.len());
        for number in numbers {
            let id = session.candidate_ids[number as usize - 1];
            match self.repository.fetch(id) {
                Ok(Some(record)) => candidates.push(record),
                Ok(None) => warn!(%id, number, "selected candidate no longer exists"),
                Err(err) => warn!(%id, number, error = %err, "selected candidate lookup failed"),
            }
        }
        if candidates.is_empty() {
            return Err(ReplyError::NotFound);
        }

        info!(
            session_id = %session.id,
            selected = candidates.len(),
            "reply resolved against push session"
        );
        Ok(Some(Resolution {
            session_id: session.id,
            candidates,
        }))
    }
}
