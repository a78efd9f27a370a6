use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that cancels group reservations still pending after
/// their window has already ended. Quorum never arrived; without this
/// sweep the committed interval would squat on the cubicle forever.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let stale = engine.collect_stale_pending(engine.now());
        for booking_id in stale {
            match engine.expire_pending(booking_id).await {
                Ok(()) => info!("reaped stale pending reservation {booking_id}"),
                // a racing confirm or cancel may have advanced it
                Err(e) => debug!("reaper skip {booking_id}: {e}"),
            }
        }
    }
}

/// Background task that rewrites the WAL once enough appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::policy::FacilityPolicy;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("carrel_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn monday_9am() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn t(h: u32) -> chrono::NaiveTime {
        chrono::NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn reaper_cancels_pending_groups_after_their_window() {
        let path = test_wal_path("stale_pending.wal");
        let clock = Arc::new(FixedClock::at(monday_9am()));
        let engine = Arc::new(
            Engine::new(
                path,
                Arc::new(NotifyHub::new()),
                clock.clone(),
                FacilityPolicy::default(),
            )
            .unwrap(),
        );

        let cubicle = Ulid::new();
        engine
            .register_resource(Actor::admin(Ulid::new()), cubicle, ResourceKind::Cubicle {
                capacity: 4,
            })
            .await
            .unwrap();

        let creator = Actor::student(Ulid::new());
        let today = monday_9am().date();
        let booking_id = engine
            .reserve_cubicle(creator, cubicle, today, t(10), t(12), &[Ulid::new(), Ulid::new()])
            .await
            .unwrap();

        // still inside the window: nothing to reap
        clock.set(today.and_hms_opt(11, 59, 59).unwrap());
        assert!(engine.collect_stale_pending(engine.now()).is_empty());

        // window over, still pending
        clock.set(today.and_hms_opt(12, 0, 0).unwrap());
        let stale = engine.collect_stale_pending(engine.now());
        assert_eq!(stale, vec![booking_id]);

        engine.expire_pending(booking_id).await.unwrap();
        let record = engine.booking_snapshot(booking_id).await.unwrap();
        assert_eq!(record.state, ReservationState::Cancelled);

        // interval released, nothing left to reap
        assert!(engine.is_free(cubicle, today, t(10), t(12)).await.unwrap());
        assert!(engine.collect_stale_pending(engine.now()).is_empty());
    }

    #[tokio::test]
    async fn reaper_leaves_confirmed_groups_alone() {
        let path = test_wal_path("confirmed_group.wal");
        let clock = Arc::new(FixedClock::at(monday_9am()));
        let engine = Arc::new(
            Engine::new(
                path,
                Arc::new(NotifyHub::new()),
                clock.clone(),
                FacilityPolicy::default(),
            )
            .unwrap(),
        );

        let cubicle = Ulid::new();
        engine
            .register_resource(Actor::admin(Ulid::new()), cubicle, ResourceKind::Cubicle {
                capacity: 4,
            })
            .await
            .unwrap();

        let creator = Actor::student(Ulid::new());
        let (a, b) = (Ulid::new(), Ulid::new());
        let today = monday_9am().date();
        let booking_id = engine
            .reserve_cubicle(creator, cubicle, today, t(10), t(12), &[a, b])
            .await
            .unwrap();
        engine
            .respond_invitation(Actor::student(a), booking_id, true)
            .await
            .unwrap();
        engine
            .respond_invitation(Actor::student(b), booking_id, true)
            .await
            .unwrap();
        engine.confirm_group(creator, booking_id).await.unwrap();

        clock.set(today.and_hms_opt(13, 0, 0).unwrap());
        assert!(engine.collect_stale_pending(engine.now()).is_empty());
    }
}
