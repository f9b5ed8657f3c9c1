use flowq::error::QueueError;
use flowq::ident::{JobId, TaskUid, WuId};

#[test]
fn job_id_rejects_separator() {
    assert!("abc".parse::<JobId>().is_ok());
    assert!("".parse::<JobId>().is_err());
    assert!("ab_cd".parse::<JobId>().is_err());
}

#[test]
fn task_uid_round_trips() {
    let job: JobId = "4e1c9d2a".parse().unwrap();
    for (path, name) in [("", "align"), ("main", "align"), ("main/sub", "count")] {
        let uid = TaskUid::new(job.clone(), path, name);
        let parsed: TaskUid = uid.to_string().parse().unwrap();
        assert_eq!(parsed, uid, "round trip of {}", uid);
    }
}

#[test]
fn wuid_round_trips() {
    let job: JobId = "4e1c9d2a".parse().unwrap();
    for (path, name, rank) in [("", "a", 0), ("wf", "step_two", 7), ("wf/sub", "b", 12)] {
        let wuid = WuId::new(TaskUid::new(job.clone(), path, name), rank);
        let parsed: WuId = wuid.to_string().parse().unwrap();
        assert_eq!(parsed, wuid, "round trip of {}", wuid);
    }
}

#[test]
fn wuid_parse_splits_from_the_right() {
    // Task names may themselves contain underscores.
    let wuid: WuId = "job1_my_task_3".parse().unwrap();
    assert_eq!(wuid.rank, 3);
    assert_eq!(wuid.task.name, "my_task");
    assert_eq!(wuid.task.job.as_str(), "job1");
}

#[test]
fn wuid_requires_integer_rank() {
    for bad in ["job1_task_x", "job1_task_", "nounderscore"] {
        let err = bad.parse::<WuId>().unwrap_err();
        assert!(matches!(err, QueueError::MalformedId(_)), "{}", bad);
    }
}

#[test]
fn task_uid_rejects_garbage() {
    assert!("".parse::<TaskUid>().is_err());
    assert!("jobonly".parse::<TaskUid>().is_err());
    assert!("job1_".parse::<TaskUid>().is_err());
    assert!("job1_path/".parse::<TaskUid>().is_err());
}

#[test]
fn generated_job_ids_are_parseable() {
    let id = JobId::generate();
    let parsed: JobId = id.as_str().parse().unwrap();
    assert_eq!(parsed, id);
}
