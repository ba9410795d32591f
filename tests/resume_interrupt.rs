//! Cancellation and resumption: a run interrupted at an arbitrary work
//! unit, then restarted with the same mapfile, must land on the same
//! terminal state as a run that was never interrupted.
//!
//! These tests share the process-wide signal flag, so they serialise
//! themselves behind one mutex.

mod common;

use std::sync::Mutex;

use blockrescue::mapfile::{self, CursorStatus};
use blockrescue::rescue::RunOutcome;
use common::{fixture, run_rescue, settings, triples, FaultyDisk};

static SERIAL: Mutex<()> = Mutex::new(());

const KIB: i64 = 1024;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 229 + 1) as u8).collect()
}

#[test]
fn interrupt_mid_copy_then_resume() {
    let _guard = SERIAL.lock().unwrap();
    let data = pattern(1024 * 1024);

    // reference: never interrupted
    let reference = fixture();
    let (outcome, book) = run_rescue(&settings(512, 4096), FaultyDisk::new(data.clone()), &reference);
    assert_eq!(outcome, RunOutcome::Finished);
    let wanted = triples(book.logbook());

    // interrupted after ~200 KiB
    let fx = fixture();
    let mut disk = FaultyDisk::new(data.clone());
    disk.trip_signal_after(200 * KIB, libc::SIGINT);
    let (outcome, book) = run_rescue(&settings(512, 4096), disk, &fx);
    assert_eq!(outcome, RunOutcome::Interrupted(libc::SIGINT));
    assert!(book.recsize() < 1024 * KIB);

    // the snapshot describes a mid-copy state a new process can resume
    let map = mapfile::load(&fx.map_path).expect("mapfile");
    assert_eq!(map.cursor.status, CursorStatus::Copying);

    let (outcome, book) = run_rescue(&settings(512, 4096), FaultyDisk::new(data.clone()), &fx);
    assert_eq!(outcome, RunOutcome::Finished);
    assert_eq!(triples(book.logbook()), wanted);

    let out = std::fs::read(&fx.out_path).expect("read output");
    assert_eq!(out, data);
}

#[test]
fn any_interruption_point_resumes_to_the_same_terminal_map() {
    let _guard = SERIAL.lock().unwrap();
    let size = 256 * KIB as usize;
    let data = pattern(size);
    let damage = 64 * KIB..96 * KIB;

    let reference = fixture();
    let mut disk = FaultyDisk::new(data.clone());
    disk.add_bad_range(damage.clone());
    let (outcome, book) = run_rescue(&settings(512, 4096), disk, &reference);
    assert_eq!(outcome, RunOutcome::Finished);
    let wanted = triples(book.logbook());

    for trip_bytes in [32 * KIB, 100 * KIB, 200 * KIB] {
        let fx = fixture();
        let mut disk = FaultyDisk::new(data.clone());
        disk.add_bad_range(damage.clone());
        disk.trip_signal_after(trip_bytes, libc::SIGTERM);
        let (first, _) = run_rescue(&settings(512, 4096), disk, &fx);
        // late trip points may let the run finish; both endings must
        // converge after the second run
        assert!(matches!(
            first,
            RunOutcome::Finished | RunOutcome::Interrupted(_)
        ));

        let mut disk = FaultyDisk::new(data.clone());
        disk.add_bad_range(damage.clone());
        let (second, book) = run_rescue(&settings(512, 4096), disk, &fx);
        assert_eq!(second, RunOutcome::Finished);
        assert_eq!(
            triples(book.logbook()),
            wanted,
            "terminal map diverged for trip at {trip_bytes}"
        );
    }
}
