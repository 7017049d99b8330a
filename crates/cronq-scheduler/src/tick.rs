//! The scheduler tick (§4.5): advances a virtual clock once per event-loop
//! iteration and converts schedule matches into pending run counts.
//!
//! Grounded on pg_cron's `StartAllPendingRuns`/`StartPendingRuns`/
//! `ShouldRunTask` (`pg_cron.c`): the same wild/non-wild split and the same
//! DOM/DOW union-vs-intersection rule, expressed over `chrono::DateTime`
//! instead of a `struct pg_tm`.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};

use cronq_core::schedule::{Schedule, ScheduleFlags};
use cronq_core::time::{classify_clock, effective_now, minute_start, minutes_between, ClockProgress};

use crate::registry::Registry;

/// Persistent virtual clock driving the tick (§4.5's `last_minute`).
pub struct SchedulerClock {
    last_minute: DateTime<Utc>,
    rebooted: bool,
}

impl SchedulerClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        SchedulerClock {
            last_minute: minute_start(now),
            rebooted: false,
        }
    }

    pub fn last_minute(&self) -> DateTime<Utc> {
        self.last_minute
    }
}

/// Runs one tick: the reboot pass (once per process lifetime), the
/// clock-progress classification, and `enqueue_pending` for every active
/// task. Returns `None` if `now` fell within the same minute as the
/// previous tick (§4.5 step 2: "If delta == 0, return").
pub fn tick(clock: &mut SchedulerClock, now: DateTime<Utc>, registry: &mut Registry) -> Option<ClockProgress> {
    if !clock.rebooted {
        for (job, task) in registry.iter_active_mut() {
            if job.schedule.is_reboot() {
                task.pending_run_count += 1;
            }
        }
        clock.rebooted = true;
    }

    let delta = minutes_between(clock.last_minute, now);
    if delta == 0 {
        return None;
    }

    let mode = classify_clock(delta);
    let last_minute = clock.last_minute;

    let span = tracing::info_span!("scheduler.tick", mode = ?mode, pending_enqueued = tracing::field::Empty);
    let _guard = span.enter();

    let mut pending_enqueued: u64 = 0;
    for (job, task) in registry.iter_active_mut() {
        let before = task.pending_run_count;
        enqueue_pending(
            &job.schedule,
            &mut task.pending_run_count,
            mode,
            last_minute,
            now,
            job.timezone_offset_hours,
        );
        pending_enqueued += (task.pending_run_count - before) as u64;
    }
    span.record("pending_enqueued", pending_enqueued);
    drop(_guard);

    if mode != ClockProgress::JumpBackward {
        clock.last_minute = minute_start(now);
    }

    Some(mode)
}

/// §4.5's per-task virtual-minute walk. `tz_offset_hours` is the job's
/// optional fixed UTC offset (§4.2's resolved Open Question): both endpoints
/// of the walk are shifted into the job's local reference before any
/// `should_run` field matching happens.
fn enqueue_pending(
    schedule: &Schedule,
    pending: &mut u32,
    mode: ClockProgress,
    last_minute: DateTime<Utc>,
    now: DateTime<Utc>,
    tz_offset_hours: Option<i8>,
) {
    let last_minute = effective_now(last_minute, tz_offset_hours);
    let now = effective_now(now, tz_offset_hours);
    let now_minute = minute_start(now);
    let one_minute = ChronoDuration::minutes(1);

    match mode {
        ClockProgress::Progressed => {
            let mut v = last_minute + one_minute;
            while v <= now_minute {
                if should_run(schedule, v, true, true) {
                    *pending += 1;
                }
                v += one_minute;
            }
        }
        ClockProgress::JumpForward => {
            let mut v = last_minute + one_minute;
            // The original do-while `StartPendingRuns` loop tests its body
            // before its condition, so the fixed-time walk also covers
            // `now_minute` itself (§8 property 7): a job like "17 * * * *"
            // must still fire once if the skipped interval's last minute is
            // exactly the one the fixed-time field matches.
            while v <= now_minute {
                if should_run(schedule, v, false, true) {
                    *pending += 1;
                }
                v += one_minute;
            }
            if should_run(schedule, now_minute, true, false) {
                *pending += 1;
            }
        }
        ClockProgress::JumpBackward => {
            if should_run(schedule, now_minute, true, false) {
                *pending += 1;
            }
        }
        ClockProgress::Change => {
            if should_run(schedule, now_minute, true, true) {
                *pending += 1;
            }
        }
    }
}

/// §4.5's `should_run`: matches minute/hour/month by bit test, applies the
/// classical DOM/DOW union-vs-intersection rule, then gates on the
/// wild/non-wild split.
fn should_run(schedule: &Schedule, t: DateTime<Utc>, wild: bool, non_wild: bool) -> bool {
    if !schedule.minute.test(t.minute() as i32) {
        return false;
    }
    if !schedule.hour.test(t.hour() as i32) {
        return false;
    }
    if !schedule.month.test(t.month() as i32 - 1) {
        return false;
    }

    let match_dom = schedule.dom.test(t.day() as i32 - 1);
    let match_dow = schedule.dow.test(t.weekday().num_days_from_sunday() as i32);

    let day_matches = if schedule.flags.contains(ScheduleFlags::DOM_STAR)
        || schedule.flags.contains(ScheduleFlags::DOW_STAR)
    {
        match_dom && match_dow
    } else {
        match_dom || match_dow
    };
    if !day_matches {
        return false;
    }

    let is_wildcard_schedule =
        schedule.flags.contains(ScheduleFlags::MIN_STAR) || schedule.flags.contains(ScheduleFlags::HR_STAR);

    (non_wild && !is_wildcard_schedule) || (wild && is_wildcard_schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronq_core::job::JobId;
    use cronq_core::schedule::parse;
    use cronq_core::store::JobStore;
    use cronq_core::time::ymd_hms;

    async fn registry_with(schedule: &str, active: bool) -> Registry {
        registry_with_offset(schedule, active, None).await
    }

    async fn registry_with_offset(schedule: &str, active: bool, timezone_offset_hours: Option<i8>) -> Registry {
        let store = OneJobStore {
            schedule: schedule.to_string(),
            active,
            timezone_offset_hours,
        };
        let mut registry = Registry::new();
        registry.reload(&store).await.unwrap();
        registry
    }

    struct OneJobStore {
        schedule: String,
        active: bool,
        timezone_offset_hours: Option<i8>,
    }

    #[async_trait::async_trait]
    impl JobStore for OneJobStore {
        async fn list_jobs(&self) -> cronq_core::Result<Vec<cronq_core::job::JobDef>> {
            Ok(vec![cronq_core::job::JobDef {
                job_id: JobId(1),
                schedule_text: self.schedule.clone(),
                schedule: parse(&self.schedule).unwrap(),
                command: "SELECT 1".to_string(),
                node_name: "localhost".to_string(),
                node_port: 5432,
                database: "postgres".to_string(),
                user_name: "alice".to_string(),
                job_name: None,
                active: self.active,
                timezone_offset_hours: self.timezone_offset_hours,
            }])
        }
        async fn insert_job(
            &self,
            _: &cronq_core::store::Identity,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
            _: bool,
            _: Option<i8>,
        ) -> cronq_core::Result<JobId> {
            unimplemented!()
        }
        async fn alter_job(
            &self,
            _: &cronq_core::store::Identity,
            _: JobId,
            _: cronq_core::job::JobPatch,
        ) -> cronq_core::Result<()> {
            unimplemented!()
        }
        async fn delete_job(&self, _: &cronq_core::store::Identity, _: cronq_core::store::JobIdOrName) -> cronq_core::Result<()> {
            unimplemented!()
        }
        async fn next_run_id(&self) -> cronq_core::Result<cronq_core::job::RunId> {
            unimplemented!()
        }
        async fn insert_run(
            &self,
            _: cronq_core::job::RunId,
            _: JobId,
            _: &str,
            _: &str,
            _: &str,
            _: cronq_core::job::RunStatus,
        ) -> cronq_core::Result<()> {
            unimplemented!()
        }
        async fn update_run(&self, _: cronq_core::job::RunId, _: cronq_core::job::RunPatch) -> cronq_core::Result<()> {
            unimplemented!()
        }
        async fn list_runs(&self, _: JobId, _: usize) -> cronq_core::Result<Vec<cronq_core::job::RunRecord>> {
            unimplemented!()
        }
        async fn mark_pending_runs_failed(&self) -> cronq_core::Result<u64> {
            Ok(0)
        }
        fn invalidate(&self) {}
        fn take_invalidation(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn idempotent_within_the_same_minute() {
        let mut registry = registry_with("* * * * *", true).await;
        let now = ymd_hms(2026, 3, 5, 12, 0, 30);
        let mut clock = SchedulerClock::new(now);

        tick(&mut clock, now, &mut registry);
        let after_first = registry.task_mut(JobId(1)).unwrap().pending_run_count;
        tick(&mut clock, now, &mut registry);
        let after_second = registry.task_mut(JobId(1)).unwrap().pending_run_count;

        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn jump_backward_does_not_increment_fixed_time_task() {
        let mut registry = registry_with("0 3 * * *", true).await;
        let now = ymd_hms(2026, 3, 5, 12, 0, 0);
        let mut clock = SchedulerClock::new(now);
        tick(&mut clock, now, &mut registry);
        registry.task_mut(JobId(1)).unwrap().pending_run_count = 0;

        let earlier = now - ChronoDuration::minutes(2);
        let mode = tick(&mut clock, earlier, &mut registry);

        assert_eq!(mode, Some(ClockProgress::JumpBackward));
        assert_eq!(registry.task_mut(JobId(1)).unwrap().pending_run_count, 0);
    }

    #[tokio::test]
    async fn jump_backward_wildcard_fires_once_for_current_minute() {
        // S3: DST fall back, last_minute=02:30, now=02:05 (delta=-25), a
        // wildcard job fires once for the current minute and last_minute is
        // left unchanged.
        let mut registry = registry_with("*/10 * * * *", true).await;
        let last_minute = ymd_hms(2026, 3, 5, 2, 30, 0);
        let mut clock = SchedulerClock::new(last_minute);
        tick(&mut clock, last_minute, &mut registry);
        registry.task_mut(JobId(1)).unwrap().pending_run_count = 0;

        let after_fallback = ymd_hms(2026, 3, 5, 2, 10, 0);
        let mode = tick(&mut clock, after_fallback, &mut registry);

        assert_eq!(mode, Some(ClockProgress::JumpBackward));
        assert_eq!(registry.task_mut(JobId(1)).unwrap().pending_run_count, 1);
        assert_eq!(clock.last_minute(), last_minute);
    }

    #[tokio::test]
    async fn jump_forward_thirty_minutes_wildcard_fires_once() {
        let mut registry = registry_with("*/5 * * * *", true).await;
        let now = ymd_hms(2026, 3, 5, 12, 0, 0);
        let mut clock = SchedulerClock::new(now);
        tick(&mut clock, now, &mut registry);
        registry.task_mut(JobId(1)).unwrap().pending_run_count = 0;

        let later = now + ChronoDuration::minutes(30);
        let mode = tick(&mut clock, later, &mut registry);

        assert_eq!(mode, Some(ClockProgress::JumpForward));
        assert_eq!(registry.task_mut(JobId(1)).unwrap().pending_run_count, 1);
    }

    #[tokio::test]
    async fn jump_forward_thirty_minutes_fixed_time_fires_for_skipped_minute() {
        let mut registry = registry_with("17 12 * * *", true).await;
        let now = ymd_hms(2026, 3, 5, 12, 0, 0);
        let mut clock = SchedulerClock::new(now);
        tick(&mut clock, now, &mut registry);
        registry.task_mut(JobId(1)).unwrap().pending_run_count = 0;

        let later = now + ChronoDuration::minutes(30);
        let mode = tick(&mut clock, later, &mut registry);

        assert_eq!(mode, Some(ClockProgress::JumpForward));
        assert_eq!(registry.task_mut(JobId(1)).unwrap().pending_run_count, 1);
    }

    #[tokio::test]
    async fn jump_forward_fixed_time_fires_when_now_minute_itself_matches() {
        // §8 property 7's own example: last_minute=12:00, now=12:17 (delta=17,
        // JumpForward), job "17 * * * *" must still fire once even though
        // minute 17 is the walk's last (inclusive) minute, not a strictly
        // skipped one.
        let mut registry = registry_with("17 * * * *", true).await;
        let now = ymd_hms(2026, 3, 5, 12, 0, 0);
        let mut clock = SchedulerClock::new(now);
        tick(&mut clock, now, &mut registry);
        registry.task_mut(JobId(1)).unwrap().pending_run_count = 0;

        let later = now + ChronoDuration::minutes(17);
        let mode = tick(&mut clock, later, &mut registry);

        assert_eq!(mode, Some(ClockProgress::JumpForward));
        assert_eq!(registry.task_mut(JobId(1)).unwrap().pending_run_count, 1);
    }

    #[tokio::test]
    async fn clock_change_evaluates_only_the_current_minute() {
        let mut registry = registry_with("*/5 * * * *", true).await;
        let now = ymd_hms(2026, 3, 5, 12, 0, 0);
        let mut clock = SchedulerClock::new(now);
        tick(&mut clock, now, &mut registry);
        registry.task_mut(JobId(1)).unwrap().pending_run_count = 0;

        let jumped = now + ChronoDuration::minutes(400);
        let mode = tick(&mut clock, jumped, &mut registry);

        assert_eq!(mode, Some(ClockProgress::Change));
        assert_eq!(registry.task_mut(JobId(1)).unwrap().pending_run_count, 1);
    }

    #[tokio::test]
    async fn reboot_job_fires_once_on_first_tick_only() {
        let mut registry = registry_with("@reboot", true).await;
        let now = ymd_hms(2026, 3, 5, 12, 0, 0);
        let mut clock = SchedulerClock::new(now);

        tick(&mut clock, now, &mut registry);
        assert_eq!(registry.task_mut(JobId(1)).unwrap().pending_run_count, 1);

        let later = now + ChronoDuration::minutes(2);
        tick(&mut clock, later, &mut registry);
        assert_eq!(registry.task_mut(JobId(1)).unwrap().pending_run_count, 1);
    }

    #[tokio::test]
    async fn timezone_offset_shifts_fixed_time_matching() {
        // A job pinned to "0 3 * * *" with a +5h offset fires when UTC wall
        // time is 22:00 the prior day, since 22:00 + 5h = 03:00 in the job's
        // local reference.
        let mut registry = registry_with_offset("0 3 * * *", true, Some(5)).await;
        let now = ymd_hms(2026, 3, 5, 21, 0, 0);
        let mut clock = SchedulerClock::new(now);
        tick(&mut clock, now, &mut registry);
        registry.task_mut(JobId(1)).unwrap().pending_run_count = 0;

        let later = now + ChronoDuration::minutes(60);
        tick(&mut clock, later, &mut registry);

        assert_eq!(registry.task_mut(JobId(1)).unwrap().pending_run_count, 1);
    }
}
