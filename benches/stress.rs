use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use clinicbook::auth::{Caller, CallerContext};
use clinicbook::cache::MemoryCache;
use clinicbook::engine::{BookingRequest, Engine, EngineError};
use clinicbook::model::{EmployeeRole, Subject};
use clinicbook::notify::InvalidationNotifier;

const HOUR: i64 = 3_600_000;
/// 2030-01-01T00:00:00Z
const BASE: i64 = 1_893_456_000_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

struct Setup {
    engine: Arc<Engine>,
    ctx: CallerContext,
    clinic: Ulid,
    employees: Vec<Ulid>,
    patients: Vec<Ulid>,
}

async fn setup(name: &str, n_employees: usize, n_patients: usize) -> Setup {
    let dir = std::env::temp_dir().join(format!("clinicbook_bench_{name}_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let notify = Arc::new(InvalidationNotifier::new(Arc::new(MemoryCache::new())));
    let engine = Arc::new(Engine::new(Ulid::new(), dir.join("bench.wal"), notify).unwrap());
    let company = engine
        .init_company("Bench".into(), "owner@bench.test", "Owner".into())
        .await
        .unwrap();
    let (owner, _) = engine.staff_member("owner@bench.test").unwrap();
    let ctx = CallerContext {
        caller: Caller {
            uid: "bench".into(),
            email: "owner@bench.test".into(),
        },
        company_id: company.id,
        employee_id: owner,
        role: EmployeeRole::Owner,
    };
    let clinic = engine.create_clinic("Main".into(), None).await.unwrap().id;

    let mut employees = vec![owner];
    for i in 1..n_employees {
        let e = engine
            .add_employee(&format!("staff{i}@bench.test"), format!("Staff {i}"))
            .await
            .unwrap();
        employees.push(e.id);
    }
    let mut patients = Vec::new();
    for i in 0..n_patients {
        let p = engine
            .create_patient(clinic, format!("Patient {i}"), None, 1_000)
            .await
            .unwrap();
        patients.push(p.id);
    }
    Setup {
        engine,
        ctx,
        clinic,
        employees,
        patients,
    }
}

fn request(patient: Ulid, employee: Ulid, slot: i64) -> BookingRequest {
    let start = BASE + slot * HOUR;
    BookingRequest {
        subject: Subject::Individual { patient_id: patient },
        employee_id: employee,
        service_id: None,
        start,
        end: start + HOUR,
    }
}

async fn phase1_sequential() {
    let s = setup("sequential", 1, 1).await;
    let n = 1_000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        s.engine
            .book(&s.ctx, s.clinic, request(s.patients[0], s.employees[0], i as i64))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Independent employees: group commit should batch across them.
async fn phase2_parallel_employees() {
    let n_tasks = 10;
    let n_per_task = 200;
    let s = setup("parallel", n_tasks, n_tasks).await;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = s.engine.clone();
        let ctx = s.ctx.clone();
        let (clinic, patient, employee) = (s.clinic, s.patients[i], s.employees[i]);
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine
                    .book(&ctx, clinic, request(patient, employee, j as i64))
                    .await
                    .unwrap();
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
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Every task races for the same slots on one employee.
async fn phase3_contended() {
    let n_tasks = 20;
    let n_slots = 100;
    let s = setup("contended", 1, n_tasks).await;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = s.engine.clone();
        let ctx = s.ctx.clone();
        let (clinic, patient, employee) = (s.clinic, s.patients[i], s.employees[0]);
        handles.push(tokio::spawn(async move {
            let (mut won, mut lost) = (0usize, 0usize);
            let mut latencies = Vec::with_capacity(n_slots);
            for slot in 0..n_slots {
                let t = Instant::now();
                match engine.book(&ctx, clinic, request(patient, employee, slot as i64)).await {
                    Ok(_) => won += 1,
                    Err(EngineError::Conflict(_)) => lost += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
                latencies.push(t.elapsed());
            }
            (won, lost, latencies)
        }));
    }

    let (mut won, mut lost) = (0, 0);
    let mut latencies = Vec::new();
    for h in handles {
        let (w, l, lat) = h.await.unwrap();
        won += w;
        lost += l;
        latencies.extend(lat);
    }
    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} tasks racing for {n_slots} slots: {won} booked, {lost} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots, "each slot must be booked exactly once");
    print_latency("attempt latency", &mut latencies);
}

/// Free-time queries while writers keep booking.
async fn phase4_read_under_load() {
    let s = setup("read_load", 2, 2).await;
    let writer_engine = s.engine.clone();
    let ctx = s.ctx.clone();
    let (clinic, patient, employee) = (s.clinic, s.patients[0], s.employees[0]);
    let writer = tokio::spawn(async move {
        for slot in 0..500 {
            writer_engine
                .book(&ctx, clinic, request(patient, employee, slot))
                .await
                .unwrap();
        }
    });

    let mut latencies = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        s.engine
            .free_time(employee, BASE, BASE + 600 * HOUR, None)
            .await
            .unwrap();
        latencies.push(t.elapsed());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    print_latency("free-time latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== clinicbook stress benchmark ===\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential().await;

    println!("\n[phase 2] parallel bookings across employees");
    phase2_parallel_employees().await;

    println!("\n[phase 3] contended bookings on one employee");
    phase3_contended().await;

    println!("\n[phase 4] free-time reads under write load");
    phase4_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
