//! Example demonstrating concurrent operations on the lock-free IntMap
//!
//! Several threads insert, read and remove at the same time, starting from a
//! two-slot table, so every resize is shared between them.

use kovan_intmap::IntMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    println!("=== Lock-Free IntMap Demo ===\n");

    let map = Arc::new(IntMap::new());
    println!("Initial capacity: {}\n", map.capacity());

    // Concurrent inserts
    println!("Benchmarking concurrent inserts...");
    let start = Instant::now();
    let mut handles = Vec::new();

    for thread_id in 0..8i64 {
        let map_clone = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for i in 1..=10_000 {
                let key = thread_id * 10_000 + i;
                map_clone.put(key, key * 2).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Inserted 80,000 entries from 8 threads in {:?} ({:.2} ops/sec)",
        duration,
        80_000.0 / duration.as_secs_f64()
    );
    println!("Capacity grew to {}\n", map.capacity());

    // Concurrent reads
    println!("Benchmarking concurrent reads...");
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..8 {
        let map_clone = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            let mut found = 0;
            for key in 1..=80_000 {
                if map_clone.get(key).unwrap() == key * 2 {
                    found += 1;
                }
            }
            found
        }));
    }

    let found: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    println!(
        "Performed 640,000 reads in {:?}, {} hits\n",
        start.elapsed(),
        found
    );

    // Concurrent removes
    println!("Removing every even key...");
    let mut handles = Vec::new();
    for thread_id in 0..4i64 {
        let map_clone = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for key in (thread_id * 20_000 + 1..=(thread_id + 1) * 20_000).filter(|k| k % 2 == 0) {
                map_clone.remove(key).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let remaining = (1..=80_000).filter(|&k| map.get(k).unwrap() != 0).count();
    println!("{} entries remain", remaining);

    // Invalid arguments are reported, not panicked on
    match map.put(0, 1) {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("Rejected: {}", e),
    }
}
