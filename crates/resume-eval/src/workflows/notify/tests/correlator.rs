use super::common::*;
use std::sync::Arc;

use chrono::Utc;

use crate::workflows::candidates::CandidateId;
use crate::workflows::notify::correlator::{ReplyCorrelator, ReplyError};
use crate::workflows::notify::session::PushSessionStore;

fn correlator_with_session(session: &[u64]) -> ReplyCorrelator<MemoryRepository> {
    let repository = Arc::new(MemoryRepository::with(vec![
        record(7, "张三", 91.0),
        record(3, "李四", 84.0),
        record(9, "王五", 77.0),
    ]));
    let sessions = Arc::new(PushSessionStore::new());
    sessions.create(session.iter().copied().map(CandidateId).collect(), Utc::now());
    ReplyCorrelator::new(repository, sessions)
}

#[test]
fn maps_reply_numbers_through_session_order() {
    let correlator = correlator_with_session(&[7, 3, 9]);

    let resolution = correlator
        .resolve("1,3")
        .expect("valid selection")
        .expect("numbers present");

    assert_eq!(resolution.candidate_ids(), vec![CandidateId(7), CandidateId(9)]);
    assert_eq!(resolution.candidates[1].name, "王五");
}

#[test]
fn out_of_range_numbers_are_reported_with_the_valid_range() {
    let correlator = correlator_with_session(&[7, 3, 9]);

    let error = correlator.resolve("1,5").expect_err("5 is out of range");

    assert_eq!(
        error,
        ReplyError::OutOfRange {
            invalid: vec![5],
            len: 3
        }
    );
    let message = error.to_string();
    assert!(message.contains('5'));
    assert!(message.contains("1-3"));
}

#[test]
fn zero_is_out_of_range() {
    let correlator = correlator_with_session(&[7, 3, 9]);
    assert!(matches!(
        correlator.resolve("0"),
        Err(ReplyError::OutOfRange { invalid, .. }) if invalid == vec![0]
    ));
}

#[test]
fn chatter_without_numbers_is_ignored_even_without_a_session() {
    let repository = Arc::new(MemoryRepository::default());
    let correlator = ReplyCorrelator::new(repository, Arc::new(PushSessionStore::new()));

    assert_eq!(correlator.resolve("收到，谢谢"), Ok(None));
    assert_eq!(correlator.resolve("2"), Err(ReplyError::NoSession));
}

#[test]
fn missing_records_are_skipped_and_all_missing_is_an_error() {
    let correlator = correlator_with_session(&[7, 100]);

    let resolution = correlator
        .resolve("2 1")
        .expect("one record survives")
        .expect("numbers present");
    assert_eq!(resolution.candidate_ids(), vec![CandidateId(7)]);

    assert_eq!(correlator.resolve("2"), Err(ReplyError::NotFound));
}
