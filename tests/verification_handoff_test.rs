//! The filesystem verification handoff: request publication, response
//! consumption, and the poll loop's give-up behavior.

use std::time::Duration;

use zhipin_pilot::verify::channel::{Challenge, FileHandoffChannel, HandoffChannel};
use zhipin_pilot::verify::poll_for_code;

fn temp_channel() -> (FileHandoffChannel, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("zhipin-verify-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    (FileHandoffChannel::new(dir.clone()), dir)
}

fn challenge(task_id: &str) -> Challenge {
    Challenge {
        user_id: "it-user".to_string(),
        job_name: "运营经理".to_string(),
        screenshot_path: "/tmp/challenge.png".to_string(),
        task_id: task_id.to_string(),
        timestamp: 1_750_000_000_000,
    }
}

#[tokio::test]
async fn request_and_response_round_trip() {
    let (ch, dir) = temp_channel();

    let location = ch.publish(&challenge("task-1")).await.unwrap();
    assert!(location.contains("boss_verification_request_it-user_1750000000000.json"));

    // An external resolver answers by dropping the response file.
    let response = dir.join("boss_verification_response_it-user_task-1.json");
    std::fs::write(&response, r#"{"code": "998877"}"#).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let code = poll_for_code(&ch, "it-user", "task-1", deadline).await;
    assert_eq!(code.as_deref(), Some("998877"));

    // Consumed: the file is gone and a second poll finds nothing.
    assert!(!response.exists());
    assert!(ch
        .try_take_response("it-user", "task-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn poll_gives_up_when_nobody_answers() {
    let (ch, _dir) = temp_channel();
    ch.publish(&challenge("task-silent")).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(300);
    let code = poll_for_code(&ch, "it-user", "task-silent", deadline).await;
    assert!(code.is_none());
}

#[tokio::test]
async fn blank_code_is_treated_as_no_response() {
    let (ch, dir) = temp_channel();
    let response = dir.join("boss_verification_response_it-user_task-2.json");
    std::fs::write(&response, r#"{"code": "   "}"#).unwrap();

    assert!(ch
        .try_take_response("it-user", "task-2")
        .await
        .unwrap()
        .is_none());
    // Still consumed so a junk file cannot wedge the poll loop.
    assert!(!response.exists());
}
