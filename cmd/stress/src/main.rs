//! Stress workload - scattered accesses over a large array
//!
//! Starts the agent in-process, then hammers a ~75 MiB array with a
//! multiplicative walk so a handful of huge pages stay hot. Run with
//! `HPT_DEBUG=1` to watch sessions start and pages get promoted.
//!
//! Usage: stress [rounds] [workers]

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hpt::{Agent, AgentConfig};

/// Array length in i32 elements
const LEN: usize = 0x123_4567;
/// Saturation value per element; bounds the inner walk
const CAP: i32 = 100;

fn walk(a: &mut [i32], rounds: usize, touched: &AtomicU64) {
    let n = a.len() as u64;
    for i in 0..rounds {
        let mut j = (i as u64) % n;
        let mut steps = 0u64;
        while a[j as usize] < CAP {
            a[j as usize] += 1;
            j = (j * 131 + 25) % n;
            steps += 1;
        }
        touched.fetch_add(steps, Ordering::Relaxed);
    }
}

fn main() {
    println!("=== hugepagetune stress ===\n");

    let rounds: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(2_000_000);
    let workers: usize = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);

    let config = AgentConfig::from_env();
    println!(
        "interval {:?}, threshold {}, policy {}",
        config.interval,
        config.threshold,
        config.merge_policy.name()
    );
    let agent = match Agent::start(config) {
        Ok(agent) => Some(agent),
        Err(e) => {
            eprintln!("agent not started ({}), running workload unmonitored", e);
            None
        }
    };

    let touched = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let touched = touched.clone();
            thread::Builder::new()
                .name(format!("stress-{}", w))
                .spawn(move || {
                    let mut a = vec![0i32; LEN];
                    walk(&mut a, rounds, &touched);
                    a[0x23_4567]
                })
        })
        .filter_map(Result::ok)
        .collect();

    // Progress while the workers run
    while handles.iter().any(|h| !h.is_finished()) {
        thread::sleep(Duration::from_millis(500));
        print!(
            "\rTouched: {} ({:.1}s)",
            touched.load(Ordering::Relaxed),
            start.elapsed().as_secs_f64()
        );
        let _ = std::io::stdout().flush();
    }
    let checksum: i64 = handles
        .into_iter()
        .filter_map(|h| h.join().ok())
        .map(i64::from)
        .sum();

    let elapsed = start.elapsed();
    println!("\n\n=== Results ===");
    println!("Workers:    {}", workers);
    println!("Rounds:     {}", rounds);
    println!("Touched:    {}", touched.load(Ordering::Relaxed));
    println!("Time:       {:?}", elapsed);
    println!("Checksum:   {}", checksum);

    if let Some(agent) = agent {
        let sessions = agent.supervisor().spawned_sessions();
        let stats = agent.shutdown();
        println!("Cycles:     {}", stats.cycles);
        println!("Threads:    {}", stats.threads_added);
        println!("Sessions:   {} started, {} failed", sessions, stats.sessions_failed);
        println!("Promotions: {}", stats.promotions);
    }
}
