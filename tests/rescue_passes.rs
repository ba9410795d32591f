mod common;

use blockrescue::rescue::RunOutcome;
use common::{
    assert_conservation, build_rescue, fixture, run_rescue, settings, triples, FaultyDisk,
};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 239 + 1) as u8).collect()
}

const KIB: i64 = 1024;
const MIB: i64 = 1024 * 1024;

#[test]
fn large_bad_extent_is_skipped_then_narrowed() {
    let fx = fixture();
    let data = pattern(MIB as usize);
    let mut disk = FaultyDisk::new(data);
    // clean 64 KiB head, 512 KiB damaged middle, clean tail
    disk.add_bad_range(64 * KIB..64 * KIB + 512 * KIB);

    let (outcome, book) = run_rescue(&settings(512, 4096), disk, &fx);

    assert_eq!(outcome, RunOutcome::Finished);
    assert_eq!(
        triples(book.logbook()),
        vec![
            (0, 64 * KIB, '+'),
            (64 * KIB, 512 * KIB, '-'),
            (576 * KIB, MIB - 576 * KIB, '+'),
        ]
    );
    assert_eq!(book.recsize(), MIB - 512 * KIB);
    assert_eq!(book.errsize(), 512 * KIB);
    assert_eq!(book.errors(), 1);
    assert_conservation(&book);
}

#[test]
fn trim_locates_the_edge_and_split_recovers_the_interior() {
    let fx = fixture();
    // a previous run left [0, 1024) non-trimmed and the rest finished
    std::fs::write(
        &fx.map_path,
        "0x00000000     ?\n\
         0x00000000  0x00000400  *\n\
         0x00000400  0x00000C00  +\n",
    )
    .expect("seed mapfile");
    let mut disk = FaultyDisk::new(pattern(4096));
    disk.add_bad_range(512..1024);

    let (outcome, book) = run_rescue(&settings(512, 4096), disk, &fx);

    assert_eq!(outcome, RunOutcome::Finished);
    assert_eq!(
        triples(book.logbook()),
        vec![(0, 512, '+'), (512, 512, '-'), (1024, 3072, '+')]
    );
    assert_eq!(book.recsize(), 3584);
    assert_eq!(book.errsize(), 512);
    assert_conservation(&book);
}

#[test]
fn nosplit_leaves_the_interior_untouched() {
    let fx = fixture();
    std::fs::write(
        &fx.map_path,
        "0x00000000     ?\n\
         0x00000000  0x00000400  *\n\
         0x00000400  0x00000C00  +\n",
    )
    .expect("seed mapfile");
    let mut disk = FaultyDisk::new(pattern(4096));
    disk.add_bad_range(512..1024);
    let mut s = settings(512, 4096);
    s.nosplit = true;

    let (outcome, book) = run_rescue(&s, disk, &fx);

    assert_eq!(outcome, RunOutcome::Finished);
    assert_eq!(
        triples(book.logbook()),
        vec![(0, 512, '/'), (512, 512, '-'), (1024, 3072, '+')]
    );
    assert_eq!(book.errsize(), 1024);
}

#[test]
fn retries_recover_a_flaky_sector() {
    let fx = fixture();
    let data = pattern(4096);
    let mut disk = FaultyDisk::new(data.clone());
    disk.add_flaky_range(1024..1536, 2); // pass 1 burns one failure
    let mut s = settings(512, 4096);
    s.max_retries = 2;

    let (outcome, book) = run_rescue(&s, disk, &fx);

    assert_eq!(outcome, RunOutcome::Finished);
    assert_eq!(triples(book.logbook()), vec![(0, 4096, '+')]);
    assert_eq!(book.recsize(), 4096);
    assert_eq!(book.errsize(), 0);
    let out = std::fs::read(&fx.out_path).expect("read output");
    assert_eq!(out, data);
}

#[test]
fn bounded_retries_give_up_on_a_stubborn_sector() {
    let fx = fixture();
    let mut disk = FaultyDisk::new(pattern(4096));
    disk.add_flaky_range(1024..1536, 5);
    let mut s = settings(512, 4096);
    s.max_retries = 2; // three attempts in total, five needed

    let (outcome, book) = run_rescue(&s, disk, &fx);

    assert_eq!(outcome, RunOutcome::Finished);
    assert_eq!(
        triples(book.logbook()),
        vec![(0, 1024, '+'), (1024, 512, '-'), (1536, 2560, '+')]
    );
    assert_eq!(book.errsize(), 512);
}

#[test]
fn unbounded_retries_terminate_once_the_sector_reads() {
    let fx = fixture();
    let mut disk = FaultyDisk::new(pattern(4096));
    disk.add_flaky_range(1024..1536, 5);
    let mut s = settings(512, 4096);
    s.max_retries = -1;

    let (outcome, book) = run_rescue(&s, disk, &fx);

    assert_eq!(outcome, RunOutcome::Finished);
    assert_eq!(triples(book.logbook()), vec![(0, 4096, '+')]);
    assert_eq!(book.errsize(), 0);
}

#[test]
fn retrim_demotes_split_and_bad_areas() {
    let fx = fixture();
    std::fs::write(
        &fx.map_path,
        "0x00000000     ?\n\
         0x00000000  0x00000200  /\n\
         0x00000200  0x00000200  -\n\
         0x00000400  0x00000400  *\n\
         0x00000800  0x00000800  +\n",
    )
    .expect("seed mapfile");
    let mut s = settings(512, 4096);
    s.retrim = true;

    let book = build_rescue(&s, FaultyDisk::new(pattern(4096)), &fx);
    assert_eq!(
        triples(book.logbook()),
        vec![(0, 2048, '*'), (2048, 2048, '+')]
    );
}

#[test]
fn retrim_then_try_again_collapse_to_non_tried() {
    let fx = fixture();
    std::fs::write(
        &fx.map_path,
        "0x00000000     ?\n\
         0x00000000  0x00000200  /\n\
         0x00000200  0x00000200  -\n\
         0x00000400  0x00000400  *\n\
         0x00000800  0x00000800  +\n",
    )
    .expect("seed mapfile");
    let mut s = settings(512, 4096);
    s.retrim = true;
    s.try_again = true;

    let book = build_rescue(&s, FaultyDisk::new(pattern(4096)), &fx);
    assert_eq!(
        triples(book.logbook()),
        vec![(0, 2048, '?'), (2048, 2048, '+')]
    );
}
