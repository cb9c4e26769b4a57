//! Shared State Concurrency Tests
//!
//! One appender thread races reader and updater threads against the
//! shared frame store. The published record counter must never run
//! ahead of fully-written records: a reader that observes `len() == n`
//! gets `n` complete, ordered records.
//!
//! Run with: `cargo test --test shared_state_concurrency`

use drishti_slam::{
    BufferRef, FrameInput, FrameRecord, Intrinsics, Pose, create_shared_state,
};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

fn frame(i: usize) -> FrameInput {
    FrameInput {
        timestamp: i as f64 * 0.1,
        image: BufferRef(i as u64),
        depth: None,
        intrinsics: Intrinsics::default(),
        gt_pose: None,
    }
}

#[test]
fn counter_never_exposes_torn_records() {
    const FRAMES: usize = 2000;

    let state = create_shared_state();
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let state = state.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for i in 0..FRAMES {
                let pose = Pose::from_translation(i as f64, 0.0, 0.0);
                state.append(FrameRecord::from_input(&frame(i), pose));
                if rng.gen_bool(0.01) {
                    thread::sleep(Duration::from_micros(50));
                }
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let state = state.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut max_seen = 0usize;
                while !done.load(Ordering::Acquire) {
                    let n = state.len();
                    // Monotone: the counter only grows.
                    assert!(n >= max_seen);
                    max_seen = n;

                    let slice = state.read();
                    // Every published record is complete and in order.
                    assert!(slice.frames.len() >= n);
                    for (i, rec) in slice.frames.iter().take(n).enumerate() {
                        assert_eq!(rec.image, BufferRef(i as u64));
                        assert_eq!(rec.pose.translation[0], i as f64);
                    }
                }
            })
        })
        .collect();

    let updater = {
        let state = state.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            while !done.load(Ordering::Acquire) {
                let n = state.len();
                if n > 0 {
                    let i = rng.gen_range(0..n);
                    // Overwrite with the same translation: readers can
                    // then still validate record contents exactly.
                    let pose = Pose::from_translation(i as f64, 0.0, 0.0);
                    assert!(state.update_pose(i, pose, 0.5));
                }
            }
        })
    };

    writer.join().unwrap();
    updater.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(state.len(), FRAMES);
    let ts = state.timestamps();
    assert_eq!(ts.len(), FRAMES);
    assert!(ts.windows(2).all(|w| w[0] < w[1]));
}
