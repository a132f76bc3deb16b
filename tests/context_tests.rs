mod util;
use util::*;

use halo_decomp::prelude::*;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;

#[test]
#[serial]
fn mismatched_extent_fails_identically_on_every_rank() {
    let dir = scratch_dir("ctx-mismatch");
    let cfg = DecompositionConfig::new([2, 2, 2], [true; 3]).with_log_dir(&dir);
    let messages = run_ranks(6, |comm| match Context::initialize(comm, "bad", &cfg) {
        Ok(_) => panic!("initialize must reject a 6-process launch of a 2x2x2 grid"),
        Err(e) => {
            assert_eq!(e.exit_code(), 255);
            e.to_string()
        }
    });
    assert!(messages.iter().all(|m| m == &messages[0]));
    assert!(messages[0].contains("(=   6)"));
    assert!(messages[0].ends_with("expected processes =    8"));
    // nothing was opened
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn lifecycle_merges_logs_in_rank_order() {
    let dir = scratch_dir("ctx-life");
    let cfg = DecompositionConfig::new([2, 2, 1], [true, true, false]).with_log_dir(&dir);
    let out = SharedBuf::default();
    let err = SharedBuf::default();

    let coords = run_ranks(4, |comm| {
        let mut ctx = Context::initialize(comm, "life", &cfg).unwrap();
        assert_eq!(
            ctx.sink_path(Channel::Stdout),
            dir.join(format!("life_PE{:04}.stdout", ctx.rank()))
        );
        let (rank, coord) = (ctx.rank(), ctx.coord());
        writeln!(ctx.out(), "rank {} at {:?}", rank, coord).unwrap();
        writeln!(ctx.err(), "no errors on {}", rank).unwrap();

        // exchange coordinates along every axis
        let me = ctx.coord().map(|c| c as u32);
        let mut bufs = [[0u32; 12]; 3];
        for b in &mut bufs {
            b[..3].copy_from_slice(&me);
            b[3..6].copy_from_slice(&me);
            b[6..].fill(u32::MAX);
        }
        let [b0, b1, b2] = &mut bufs;
        let pending = ctx.begin_all(
            ExchangeBuffer::from_elems(b0, 3).unwrap(),
            ExchangeBuffer::from_elems(b1, 3).unwrap(),
            ExchangeBuffer::from_elems(b2, 3).unwrap(),
        );
        let report = ctx.wait(pending).unwrap();
        assert_eq!(report.count(OpStatus::Completed), 8);
        assert_eq!(report.count(OpStatus::Skipped), 4);

        let paths = Channel::ALL.map(|c| ctx.sink_path(c).to_path_buf());
        ctx.finalize_into(&mut out.clone(), &mut err.clone()).unwrap();
        assert!(paths.iter().all(|p| !p.exists()));
        bufs
    });

    // rank 0 = (0,0,0): both x neighbours are (1,0,0), both y neighbours (0,1,0)
    let b = &coords[0];
    assert_eq!(&b[0][6..], &[1, 0, 0, 1, 0, 0]);
    assert_eq!(&b[1][6..], &[0, 1, 0, 0, 1, 0]);
    assert_eq!(&b[2][6..], &[u32::MAX; 6]);

    let text = out.text();
    let positions: Vec<usize> = (0..4)
        .map(|r| text.find(&format!("--- begin stdout from PE ={r:4} ---")).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(text.contains("rank 3 at [1, 1, 0]\n--- end   stdout from PE =   3 ---"));
    assert!(err.text().contains("no errors on 2"));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn failed_requests_are_recorded_in_the_error_stream() {
    let dir = scratch_dir("ctx-fail");
    let cfg = DecompositionConfig::new([2, 1, 1], [false; 3]).with_log_dir(&dir);
    let err = SharedBuf::default();

    run_ranks(2, |comm| {
        let mut ctx = Context::initialize(comm, "fail", &cfg).unwrap();
        let count = ctx.rank() + 1;
        let mut data = vec![0u8; 4 * count];
        let buf = ExchangeBuffer::new(&mut data, 1, count).unwrap();
        let pending = ctx.begin_directional(Axis::X, buf);
        let res = ctx.wait(pending);
        assert!(matches!(res, Err(HaloError::Transport { .. })));
        ctx.finalize_into(&mut Vec::new(), &mut err.clone()).unwrap();
    });

    let text = err.text();
    assert!(text.contains("halo request[ 3] from rank   0 failed ! (axis 0, RecvUpper, peer 1)"));
    assert!(text.contains("halo request[ 2] from rank   1 failed ! (axis 0, RecvLower, peer 0)"));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn topology_info_lists_neighbour_coordinates() {
    let dir = scratch_dir("ctx-info");
    let cfg = DecompositionConfig::new([2, 2, 1], [true, true, false])
        .with_concatenate(false)
        .with_log_dir(&dir);

    let infos = run_ranks(4, |comm| {
        let ctx = Context::initialize(comm, "info", &cfg).unwrap();
        let mut info = Vec::new();
        ctx.print_topology_info(&mut info).unwrap();
        let name = ctx.filename("field", "vtk");
        ctx.finalize_into(&mut Vec::new(), &mut Vec::new()).unwrap();
        (String::from_utf8(info).unwrap(), name)
    });

    let (info, name) = &infos[0];
    assert_eq!(name, "field-000-000-000.vtk");
    assert!(info.contains("Number of Process   :    4"));
    assert!(info.contains("This Rank           :    0"));
    assert!(info.contains(" neighbor in dir 0: [ 1, 0, 0] <= [ 0, 0, 0] => [ 1, 0, 0]"));
    assert!(info.contains(" neighbor in dir 2: [-1,-1,-1] <= [ 0, 0, 0] => [-1,-1,-1]"));
    assert_eq!(infos[3].1, "field-001-001-000.vtk");

    // sinks are kept when concatenation is off
    assert!(dir.join("info_PE0003.stdout").exists());
    assert!(dir.join("info_PE0000.stderr").exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn drop_without_finalize_still_closes_sinks() {
    let dir = scratch_dir("ctx-drop");
    let cfg = DecompositionConfig::default()
        .with_concatenate(false)
        .with_log_dir(&dir);
    {
        let mut ctx = Context::initialize(NoComm, "dropped", &cfg).unwrap();
        writeln!(ctx.out(), "buffered line").unwrap();
    }
    let text = std::fs::read_to_string(dir.join("dropped_PE0000.stdout")).unwrap();
    assert_eq!(text, "buffered line\n");
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn unwritable_log_dir_is_a_sink_error() {
    let missing = std::env::temp_dir()
        .join(format!("halo-decomp-absent-{}", std::process::id()))
        .join("logs");
    let cfg = DecompositionConfig::default().with_log_dir(&missing);
    let err = Context::initialize(NoComm, "nowhere", &cfg).err().unwrap();
    assert!(matches!(err, HaloError::Sink { .. }), "{err}");
    assert_eq!(err.exit_code(), 1);
    assert!(!missing.exists());
}

#[test]
#[serial]
fn panicking_rank_skips_the_ring_and_keeps_logs() {
    let dir = scratch_dir("ctx-panic");
    let cfg = DecompositionConfig::new([2, 1, 1], [false; 3]).with_log_dir(&dir);
    let universe = LocalUniverse::new(2);
    let comm = universe.comm(1);
    let (tx, rx) = std::sync::mpsc::channel();

    // rank 0 never reaches finalize, so no token ever arrives
    let worker_cfg = cfg.clone();
    std::thread::spawn(move || {
        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut ctx = Context::initialize(comm, "crash", &worker_cfg).unwrap();
            writeln!(ctx.out(), "before the crash").unwrap();
            panic!("rank 1 fails mid-run");
        }));
        let _ = tx.send(unwound.is_err());
    });

    let unwound = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("panicking rank must not wait for the concatenation token");
    assert!(unwound);
    let kept = std::fs::read_to_string(dir.join("crash_PE0001.stdout")).unwrap();
    assert_eq!(kept, "before the crash\n");
    assert!(dir.join("crash_PE0001.stderr").exists());
    std::fs::remove_dir_all(&dir).unwrap();
}
