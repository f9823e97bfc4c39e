//! Status state machine.
//!
//! Each entity carries a [`StatusValue`] which selects the task that
//! processes its next check:
//!
//! - **off**: an alert moves to ONGOING and opens a fresh flapping window.
//! - **ongoing**: a quick recovery becomes STEALTHY, a late one OFF; severity
//!   changes count as oscillations and may make the entity FLAPPING.
//! - **stealthy**: a repeated state or an elapsed window settles the entity,
//!   further oscillations may make it FLAPPING.
//! - **flapping**: stays FLAPPING while enough oscillations remain within
//!   the flapping window.
//! - **canceled**: settles plainly, dropping all hysteresis.
//!
//! A duration equal to its threshold has not expired yet.

use crate::config::EngineConfig;
use crate::db::{StatusRecord, StatusValue};

/// A check outcome to apply to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Check {
    pub state: i32,
    pub timestamp: i64,
}

impl Check {
    pub fn new(state: i32, timestamp: i64) -> Self {
        Self { state, timestamp }
    }
}

/// Handler selected by the status configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTask {
    Off,
    Ongoing,
    Stealthy,
    Flapping,
    Canceled,
}

impl StatusTask {
    /// Resolve a task path from the status configuration.
    pub fn from_path(path: &str) -> Option<Self> {
        let name = path.strip_prefix("statusmanager.").unwrap_or(path);
        match name {
            "off" => Some(StatusTask::Off),
            "ongoing" => Some(StatusTask::Ongoing),
            "stealthy" => Some(StatusTask::Stealthy),
            "flapping" => Some(StatusTask::Flapping),
            "canceled" => Some(StatusTask::Canceled),
            _ => None,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            StatusTask::Off => "statusmanager.off",
            StatusTask::Ongoing => "statusmanager.ongoing",
            StatusTask::Stealthy => "statusmanager.stealthy",
            StatusTask::Flapping => "statusmanager.flapping",
            StatusTask::Canceled => "statusmanager.canceled",
        }
    }

    /// The built-in task for a status.
    pub fn for_status(value: StatusValue) -> Self {
        match value {
            StatusValue::Off => StatusTask::Off,
            StatusValue::Ongoing => StatusTask::Ongoing,
            StatusValue::Stealthy => StatusTask::Stealthy,
            StatusValue::Flapping => StatusTask::Flapping,
            StatusValue::Canceled => StatusTask::Canceled,
        }
    }

    /// Compute the new classification of `record` for `check`.
    ///
    /// `record.state` still holds the previous state when the task runs;
    /// [`update_status`] records the new one afterwards.
    pub fn run(self, record: &mut StatusRecord, check: Check, cfg: &EngineConfig) {
        match self {
            StatusTask::Off => process_off(record, check),
            StatusTask::Ongoing => process_ongoing(record, check, cfg),
            StatusTask::Stealthy => process_stealthy(record, check, cfg),
            StatusTask::Flapping => process_flapping(record, check, cfg),
            StatusTask::Canceled => process_canceled(record, check, cfg),
        }
    }
}

/// Whether more than `threshold` seconds separate `since` from `now`.
fn expired(now: i64, since: i64, threshold: i64) -> bool {
    now.saturating_sub(since) > threshold
}

fn enter_off(record: &mut StatusRecord) {
    record.value = StatusValue::Off;
    record.pending_time = None;
    record.stealthy_time = None;
}

fn enter_ongoing(record: &mut StatusRecord, timestamp: i64) {
    record.value = StatusValue::Ongoing;
    record.pending_time = Some(timestamp);
    record.stealthy_time = None;
}

/// OFF for an OK state, ONGOING otherwise.
pub fn settle(record: &mut StatusRecord, check: Check) {
    if check.state == 0 {
        enter_off(record);
    } else {
        enter_ongoing(record, check.timestamp);
    }
}

/// Count `check` as an oscillation when its state differs from the record.
fn record_oscillation(record: &mut StatusRecord, check: Check) {
    if check.state != record.state {
        record.flapping_times.push(check.timestamp);
    }
}

/// Keep only flapping times within `[now - flapping_time, now]`.
pub fn prune_flapping(record: &mut StatusRecord, now: i64, flapping_time: i64) {
    record
        .flapping_times
        .retain(|&ts| ts <= now && !expired(now, ts, flapping_time));
}

fn is_flapping(record: &StatusRecord, cfg: &EngineConfig) -> bool {
    record.flapping_times.len() >= cfg.flapping_freq
}

fn process_off(record: &mut StatusRecord, check: Check) {
    if check.state == 0 {
        record.value = StatusValue::Off;
        return;
    }

    record.flapping_times = vec![check.timestamp];
    enter_ongoing(record, check.timestamp);
}

fn process_ongoing(record: &mut StatusRecord, check: Check, cfg: &EngineConfig) {
    let pending = record.pending_time.unwrap_or(record.last_state_change);

    record_oscillation(record, check);
    prune_flapping(record, check.timestamp, cfg.flapping_time);

    if is_flapping(record, cfg) {
        record.value = StatusValue::Flapping;
        record.stealthy_time = None;
        return;
    }

    if check.state == 0 {
        if expired(check.timestamp, pending, cfg.stealthy_time) {
            enter_off(record);
        } else {
            record.value = StatusValue::Stealthy;
            record.stealthy_time = Some(pending);
        }
    } else if check.state == record.state
        && expired(check.timestamp, pending, cfg.flapping_time)
    {
        record.pending_time = Some(check.timestamp);
    }
}

fn process_stealthy(record: &mut StatusRecord, check: Check, cfg: &EngineConfig) {
    let since = record.stealthy_time.unwrap_or(record.timestamp);
    let repeated = check.state == record.state;

    record_oscillation(record, check);
    prune_flapping(record, check.timestamp, cfg.flapping_time);

    if repeated || expired(check.timestamp, since, cfg.stealthy_time) {
        settle(record, check);
    } else if is_flapping(record, cfg) {
        record.value = StatusValue::Flapping;
        record.stealthy_time = None;
    } else {
        record.value = StatusValue::Stealthy;
    }
}

fn process_flapping(record: &mut StatusRecord, check: Check, cfg: &EngineConfig) {
    record_oscillation(record, check);
    prune_flapping(record, check.timestamp, cfg.flapping_time);

    if is_flapping(record, cfg) {
        record.value = StatusValue::Flapping;
    } else {
        settle(record, check);
    }
}

fn process_canceled(record: &mut StatusRecord, check: Check, cfg: &EngineConfig) {
    if !cfg.restore_event && check.state != 0 && record.state != 0 {
        return;
    }

    record.flapping_times.clear();
    settle(record, check);
}

/// Finish a status after its task ran: stamp it and record the new state.
pub fn update_status(record: &mut StatusRecord, check: Check, cfg: &EngineConfig) {
    if check.state != record.state {
        record.last_state_change = check.timestamp;
        record.state = check.state;
    }
    record.timestamp = check.timestamp;
    prune_flapping(record, check.timestamp, cfg.flapping_time);
}

/// Resolve an expired STEALTHY or FLAPPING status at `now` without a check.
///
/// Returns whether the record changed.
pub fn expire(record: &mut StatusRecord, now: i64, cfg: &EngineConfig) -> bool {
    let before = record.clone();
    let check = Check::new(record.state, now);

    match record.value {
        StatusValue::Stealthy => settle(record, check),
        StatusValue::Flapping => {
            prune_flapping(record, now, cfg.flapping_time);
            if !is_flapping(record, cfg) {
                settle(record, check);
            }
        }
        _ => {}
    }

    *record != before
}

/// Debounce level for adopting a new check state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticity {
    Hard,
    Soft,
}

impl Criticity {
    /// Consecutive occurrences a new state needs before it is adopted.
    pub fn count(self) -> u32 {
        match self {
            Criticity::Hard => 3,
            Criticity::Soft => 1,
        }
    }
}

/// Adopted state of an entity and the candidate state being counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCount {
    pub state: i32,
    pub last_state: i32,
    pub count: u32,
}

impl StateCount {
    pub fn new(state: i32) -> Self {
        Self {
            state,
            last_state: state,
            count: 1,
        }
    }
}

/// Count `state` towards replacing the adopted state.
///
/// A differing state is adopted once it was seen `criticity.count()` times
/// in a row; any other state in between restarts the count.
pub fn apply_criticity(current: Option<StateCount>, state: i32, criticity: Criticity) -> StateCount {
    let Some(mut current) = current else {
        return StateCount::new(state);
    };

    if state == current.state {
        return current;
    }

    if state != current.last_state {
        current.last_state = state;
        current.count = 1;
    } else {
        current.count += 1;
    }

    if current.count >= criticity.count() {
        current.state = state;
        current.count = 1;
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    /// Run the task selected by the record's status, then stamp it.
    fn step(record: &mut StatusRecord, state: i32, timestamp: i64, cfg: &EngineConfig) {
        let check = Check::new(state, timestamp);
        StatusTask::for_status(record.value).run(record, check, cfg);
        update_status(record, check, cfg);
    }

    fn ongoing(state: i32, pending: i64) -> StatusRecord {
        StatusRecord::new(state, pending)
    }

    #[test]
    fn test_task_paths() {
        for value in StatusValue::ALL {
            let task = StatusTask::for_status(value);
            assert_eq!(StatusTask::from_path(task.path()), Some(task));
            assert_eq!(StatusTask::from_path(value.name()), Some(task));
        }
        assert_eq!(StatusTask::from_path("statusmanager.nope"), None);
    }

    #[test]
    fn test_off_stays_off() {
        let mut record = StatusRecord::new(0, 1000);
        step(&mut record, 0, 1010, &cfg());
        assert_eq!(record.value, StatusValue::Off);
        assert_eq!(record.timestamp, 1010);
        assert_eq!(record.last_state_change, 1000);
    }

    #[test]
    fn test_off_to_ongoing_opens_window() {
        let mut record = StatusRecord::new(0, 1000);
        record.flapping_times = vec![990, 995];
        step(&mut record, 2, 1001, &cfg());

        assert_eq!(record.value, StatusValue::Ongoing);
        assert_eq!(record.pending_time, Some(1001));
        assert_eq!(record.flapping_times, vec![1001]);
        assert_eq!(record.state, 2);
        assert_eq!(record.last_state_change, 1001);
    }

    #[test]
    fn test_ongoing_quick_recovery_is_stealthy() {
        let mut record = ongoing(2, 1000);
        step(&mut record, 0, 1100, &cfg());
        assert_eq!(record.value, StatusValue::Stealthy);
        assert_eq!(record.stealthy_time, Some(1000));
    }

    #[test]
    fn test_ongoing_recovery_at_boundary_is_stealthy() {
        let mut record = ongoing(2, 1000);
        step(&mut record, 0, 1360, &cfg());
        assert_eq!(record.value, StatusValue::Stealthy);
    }

    #[test]
    fn test_ongoing_late_recovery_is_off() {
        let mut record = ongoing(2, 1000);
        step(&mut record, 0, 1361, &cfg());
        assert_eq!(record.value, StatusValue::Off);
        assert_eq!(record.pending_time, None);
        assert_eq!(record.stealthy_time, None);
    }

    #[test]
    fn test_ongoing_same_severity_resets_window_after_flapping_time() {
        let mut record = ongoing(2, 1000);
        step(&mut record, 2, 4600, &cfg());
        assert_eq!(record.value, StatusValue::Ongoing);
        assert_eq!(record.pending_time, Some(1000));

        step(&mut record, 2, 4601, &cfg());
        assert_eq!(record.value, StatusValue::Ongoing);
        assert_eq!(record.pending_time, Some(4601));
        assert!(record.flapping_times.is_empty());
    }

    #[test]
    fn test_ongoing_severity_changes_flap() {
        let cfg = EngineConfig {
            flapping_freq: 3,
            ..cfg()
        };
        let mut record = ongoing(1, 1000);

        step(&mut record, 2, 1010, &cfg);
        step(&mut record, 3, 1020, &cfg);
        assert_eq!(record.value, StatusValue::Ongoing);
        assert_eq!(record.flapping_times.len(), 2);

        step(&mut record, 1, 1030, &cfg);
        assert_eq!(record.value, StatusValue::Flapping);
    }

    #[test]
    fn test_stealthy_repeated_state_settles() {
        let mut record = ongoing(2, 1000);
        step(&mut record, 0, 1100, &cfg());
        assert_eq!(record.value, StatusValue::Stealthy);

        step(&mut record, 0, 1110, &cfg());
        assert_eq!(record.value, StatusValue::Off);
        assert_eq!(record.stealthy_time, None);
    }

    #[test]
    fn test_stealthy_oscillation_stays_stealthy() {
        let mut record = ongoing(2, 1000);
        step(&mut record, 0, 1100, &cfg());
        step(&mut record, 2, 1110, &cfg());
        assert_eq!(record.value, StatusValue::Stealthy);
        assert_eq!(record.stealthy_time, Some(1000));
        assert_eq!(record.flapping_times, vec![1100, 1110]);
    }

    #[test]
    fn test_stealthy_exit_to_ongoing_after_window() {
        let mut record = ongoing(2, 1000);
        step(&mut record, 0, 1000, &cfg());
        assert_eq!(record.value, StatusValue::Stealthy);

        step(&mut record, 2, 1000 + 360 + 1, &cfg());
        assert_eq!(record.value, StatusValue::Ongoing);
        assert_eq!(record.pending_time, Some(1361));
        assert_eq!(record.stealthy_time, None);
    }

    #[test]
    fn test_flap_detection_reaches_flapping_on_fifth_oscillation() {
        let cfg = EngineConfig {
            flapping_freq: 5,
            flapping_time: 3600,
            ..cfg()
        };
        let mut record = StatusRecord::new(0, 0);

        let states = [2, 0, 2, 0];
        for (i, state) in states.into_iter().enumerate() {
            step(&mut record, state, 10 * (i as i64 + 1), &cfg);
            assert_ne!(record.value, StatusValue::Flapping, "oscillation {}", i + 1);
        }
        assert_eq!(record.value, StatusValue::Stealthy);
        assert_eq!(record.flapping_times.len(), 4);

        step(&mut record, 2, 50, &cfg);
        assert_eq!(record.value, StatusValue::Flapping);

        step(&mut record, 0, 60, &cfg);
        assert_eq!(record.value, StatusValue::Flapping);
    }

    #[test]
    fn test_flapping_exits_when_window_drains() {
        let cfg = EngineConfig {
            flapping_freq: 3,
            flapping_time: 100,
            ..cfg()
        };
        let mut record = StatusRecord::new(2, 0);
        record.value = StatusValue::Flapping;
        record.flapping_times = vec![10, 20, 30];

        step(&mut record, 2, 110, &cfg);
        assert_eq!(record.value, StatusValue::Flapping);
        assert_eq!(record.flapping_times, vec![10, 20, 30]);

        step(&mut record, 2, 111, &cfg);
        assert_eq!(record.value, StatusValue::Ongoing);
        assert_eq!(record.flapping_times, vec![20, 30]);
        assert_eq!(record.pending_time, Some(111));
    }

    #[test]
    fn test_flapping_exit_to_off() {
        let cfg = EngineConfig {
            flapping_freq: 2,
            flapping_time: 100,
            ..cfg()
        };
        let mut record = StatusRecord::new(2, 0);
        record.value = StatusValue::Flapping;
        record.flapping_times = vec![10, 20];

        step(&mut record, 0, 500, &cfg);
        assert_eq!(record.value, StatusValue::Off);
        assert_eq!(record.flapping_times, vec![500]);
    }

    #[test]
    fn test_canceled_resolves_plainly() {
        let mut record = StatusRecord::new(2, 1000);
        record.value = StatusValue::Canceled;
        record.flapping_times = vec![990, 995];
        record.stealthy_time = Some(990);

        step(&mut record, 0, 1001, &cfg());
        assert_eq!(record.value, StatusValue::Off);
        assert!(record.flapping_times.is_empty());
        assert_eq!(record.stealthy_time, None);

        let mut record = StatusRecord::new(0, 1000);
        record.value = StatusValue::Canceled;
        step(&mut record, 3, 1001, &cfg());
        assert_eq!(record.value, StatusValue::Ongoing);
        assert_eq!(record.pending_time, Some(1001));
    }

    #[test]
    fn test_canceled_without_restore_event() {
        let cfg = EngineConfig {
            restore_event: false,
            ..cfg()
        };
        let mut record = StatusRecord::new(2, 1000);
        record.value = StatusValue::Canceled;

        step(&mut record, 3, 1010, &cfg);
        assert_eq!(record.value, StatusValue::Canceled);
        assert_eq!(record.state, 3);

        step(&mut record, 0, 1020, &cfg);
        assert_eq!(record.value, StatusValue::Off);
    }

    #[test]
    fn test_replayed_check_does_not_double_count() {
        let mut record = ongoing(2, 1000);
        step(&mut record, 3, 1010, &cfg());
        let flaps = record.flapping_times.len();

        step(&mut record, 3, 1010, &cfg());
        assert_eq!(record.flapping_times.len(), flaps);
    }

    #[test]
    fn test_flapping_times_stay_in_window() {
        let cfg = EngineConfig {
            flapping_freq: 100,
            flapping_time: 50,
            ..cfg()
        };
        let mut record = StatusRecord::new(0, 0);
        for i in 1..40 {
            let ts = i * 10;
            step(&mut record, (i % 2) as i32, ts, &cfg);
            assert!(record
                .flapping_times
                .iter()
                .all(|&t| t >= ts - cfg.flapping_time && t <= ts));
        }
    }

    #[test]
    fn test_expire_stealthy() {
        let mut record = ongoing(2, 1000);
        step(&mut record, 0, 1100, &cfg());
        assert!(expire(&mut record, 3000, &cfg()));
        assert_eq!(record.value, StatusValue::Off);
        assert!(!expire(&mut record, 3001, &cfg()));
    }

    #[test]
    fn test_expire_flapping() {
        let cfg = EngineConfig {
            flapping_freq: 2,
            flapping_time: 100,
            ..cfg()
        };
        let mut record = StatusRecord::new(1, 0);
        record.value = StatusValue::Flapping;
        record.flapping_times = vec![10, 150];

        assert!(expire(&mut record, 200, &cfg));
        assert_eq!(record.value, StatusValue::Ongoing);
        assert_eq!(record.flapping_times, vec![150]);
        assert_eq!(record.pending_time, Some(200));
    }

    #[test]
    fn test_criticity_first_state_is_adopted() {
        assert_eq!(apply_criticity(None, 2, Criticity::Hard), StateCount::new(2));
    }

    #[test]
    fn test_hard_criticity_adopts_at_threshold() {
        let mut current = StateCount::new(0);

        current = apply_criticity(Some(current), 2, Criticity::Hard);
        assert_eq!((current.state, current.last_state, current.count), (0, 2, 1));
        current = apply_criticity(Some(current), 2, Criticity::Hard);
        assert_eq!((current.state, current.count), (0, 2));
        current = apply_criticity(Some(current), 2, Criticity::Hard);
        assert_eq!((current.state, current.count), (2, 1));

        // Already adopted: nothing moves.
        assert_eq!(apply_criticity(Some(current), 2, Criticity::Hard), current);
    }

    #[test]
    fn test_criticity_count_resets_on_other_state() {
        let mut current = StateCount::new(0);
        current = apply_criticity(Some(current), 2, Criticity::Hard);
        current = apply_criticity(Some(current), 2, Criticity::Hard);
        current = apply_criticity(Some(current), 1, Criticity::Hard);
        assert_eq!((current.state, current.last_state, current.count), (0, 1, 1));

        current = apply_criticity(Some(current), 2, Criticity::Hard);
        assert_eq!((current.state, current.last_state, current.count), (0, 2, 1));
    }

    #[test]
    fn test_soft_criticity_adopts_immediately() {
        let current = apply_criticity(Some(StateCount::new(0)), 3, Criticity::Soft);
        assert_eq!(current, StateCount::new(3));
    }
}
