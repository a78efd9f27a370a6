use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, NaiveTime};
use ulid::Ulid;

use carrel::clock::FixedClock;
use carrel::model::{Actor, ResourceFamily, ResourceKind};
use carrel::notify::NotifyHub;
use carrel::policy::FacilityPolicy;
use carrel::{AvailabilityFilter, Engine};

// Twelve bookable one-hour slots per day under the default 08:00-20:00 hours.
const SLOTS_PER_DAY: u64 = 12;

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

/// `(date, start, end)` for the i-th one-hour slot, walking forward a
/// day every `SLOTS_PER_DAY` slots. Consecutive indices never collide.
fn slot(i: u64) -> (NaiveDate, NaiveTime, NaiveTime) {
    let date = base_date().checked_add_days(Days::new(i / SLOTS_PER_DAY)).unwrap();
    let hour = 8 + (i % SLOTS_PER_DAY) as u32;
    (
        date,
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
    )
}

fn fresh_engine(label: &str) -> (Arc<Engine>, PathBuf) {
    let dir = std::env::var("CARREL_BENCH_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir());
    let path = dir.join(format!("carrel_bench_{label}_{}.wal", Ulid::new()));
    let clock = Arc::new(FixedClock::at(
        base_date().and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
    ));
    let engine = Engine::new(
        path.clone(),
        Arc::new(NotifyHub::new()),
        clock,
        FacilityPolicy::default(),
    )
    .expect("open bench WAL");
    (Arc::new(engine), path)
}

async fn register_laptop(engine: &Engine) -> Ulid {
    let id = Ulid::new();
    engine
        .register_resource(Actor::admin(Ulid::new()), id, ResourceKind::Laptop {
            os: "linux".into(),
            brand: "thinkpad".into(),
        })
        .await
        .expect("register laptop");
    id
}

async fn register_cubicle(engine: &Engine) -> Ulid {
    let id = Ulid::new();
    engine
        .register_resource(Actor::admin(Ulid::new()), id, ResourceKind::Cubicle {
            capacity: 6,
        })
        .await
        .expect("register cubicle");
    id
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential() -> PathBuf {
    let (engine, path) = fresh_engine("seq");
    let mut fleet = Vec::new();
    for _ in 0..10 {
        fleet.push(register_laptop(&engine).await);
    }
    let holder = Actor::student(Ulid::new());

    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let laptop = fleet[i as usize % fleet.len()];
        let (date, s, e) = slot(i / fleet.len() as u64);
        let t = Instant::now();
        engine
            .reserve_laptop(holder, laptop, date, s, e)
            .await
            .expect("sequential reserve");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reserve latency", &mut latencies);
    path
}

async fn phase2_concurrent_groups() {
    let (engine, _) = fresh_engine("conc");
    let n_tasks = 10u64;
    let n_per_task = 200u64;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            // Each task books its own cubicle, so tasks only contend on
            // the shared WAL writer.
            let cubicle = register_cubicle(&engine).await;
            let creator = Actor::student(Ulid::new());
            for i in 0..n_per_task {
                let (date, s, e) = slot(i);
                let invitees = [Ulid::new(), Ulid::new(), Ulid::new()];
                engine
                    .reserve_cubicle(creator, cubicle, date, s, e, &invitees)
                    .await
                    .expect("concurrent group reserve");
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} group reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_reads_under_load() {
    let (engine, _) = fresh_engine("read");

    // A fleet big enough that an availability sweep does real work,
    // with a committed morning on each machine.
    for _ in 0..50 {
        let laptop = register_laptop(&engine).await;
        let holder = Actor::student(Ulid::new());
        for i in 0..4u64 {
            let (date, s, e) = slot(i);
            engine.reserve_laptop(holder, laptop, date, s, e).await.unwrap();
        }
    }

    // Background writers keep committing fresh reservations
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5usize {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let laptop = register_laptop(&engine).await;
            let holder = Actor::student(Ulid::new());
            let mut i = (w as u64) * 100_000;
            while !stop.load(Ordering::Relaxed) {
                let (date, s, e) = slot(i);
                let _ = engine.reserve_laptop(holder, laptop, date, s, e).await;
                i += 1;
            }
        }));
    }

    // Readers sweep availability and measure latency
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let filter = AvailabilityFilter {
                date: Some(base_date()),
                ..AvailabilityFilter::for_family(ResourceFamily::Laptop)
            };
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                let out = engine.availability(&filter).await;
                latencies.push(t.elapsed());
                assert!(!out.is_empty());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability sweep", &mut all_latencies);
}

async fn phase4_slot_contention() {
    let (engine, _) = fresh_engine("storm");
    let laptop = register_laptop(&engine).await;

    // Every task fights over the same twelve slots of one day.
    let n_tasks = 50u64;
    let attempts_per_task = 10u64;
    let admitted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        let admitted = admitted.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let holder = Actor::student(Ulid::new());
            for j in 0..attempts_per_task {
                let (date, s, e) = slot((task * 7 + j) % SLOTS_PER_DAY);
                match engine.reserve_laptop(holder, laptop, date, s, e).await {
                    Ok(_) => admitted.fetch_add(1, Ordering::Relaxed),
                    Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * attempts_per_task;
    let ok = admitted.load(Ordering::Relaxed);
    let no = rejected.load(Ordering::Relaxed);
    let committed = engine.schedule_on(laptop, base_date()).await.len();
    println!(
        "  {total} contended attempts in {:.2}s: {ok} admitted, {no} rejected, {committed} committed (expect {SLOTS_PER_DAY})",
        elapsed.as_secs_f64()
    );
}

async fn phase5_replay(path: PathBuf) {
    let clock = Arc::new(FixedClock::at(
        base_date().and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
    ));
    let t = Instant::now();
    let engine = Engine::new(
        path,
        Arc::new(NotifyHub::new()),
        clock,
        FacilityPolicy::default(),
    )
    .expect("replay bench WAL");
    let elapsed = t.elapsed();
    let resources = engine.list_resources().await.len();
    println!(
        "  cold start with phase-1 log: {resources} resources rebuilt in {:.2}ms",
        elapsed.as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    println!("=== carrel stress benchmark ===\n");

    println!("[phase 1] sequential reservation throughput");
    let seq_wal = phase1_sequential().await;

    println!("\n[phase 2] concurrent group-reservation throughput");
    phase2_concurrent_groups().await;

    println!("\n[phase 3] availability latency under write load");
    phase3_reads_under_load().await;

    println!("\n[phase 4] slot contention storm");
    phase4_slot_contention().await;

    println!("\n[phase 5] WAL replay cold start");
    phase5_replay(seq_wal).await;

    println!("\n=== benchmark complete ===");
}
