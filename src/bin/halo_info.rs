//! Launch check for a decomposition: run under `mpirun -n <P> halo_info [config.json]`.
//!
//! Prints the topology of every rank, then performs one directional and one
//! three-axis exchange of the process coordinates and prints what arrived.
//! All output goes to the per-process logs, merged in rank order at exit.

use halo_decomp::prelude::*;
use std::io::Write;
use std::path::Path;

const N: usize = 3;

fn coord_i32(ctx: &Context<MpiComm>) -> [i32; N] {
    ctx.coord().map(|c| c as i32)
}

fn fill_send(buf: &mut [i32; 4 * N], coord: [i32; N]) {
    buf.fill(-1);
    buf[..N].copy_from_slice(&coord);
    buf[N..2 * N].copy_from_slice(&coord);
}

fn show(out: &mut dyn Write, title: &str, buf: &[i32; 4 * N]) -> std::io::Result<()> {
    writeln!(out, "--- {title} ---")?;
    for (label, chunk) in ["send lower", "send upper", "recv lower", "recv upper"]
        .iter()
        .zip(buf.chunks(N))
    {
        writeln!(out, "{label} => [{:2},{:2},{:2}]", chunk[0], chunk[1], chunk[2])?;
    }
    Ok(())
}

fn run(ctx: &mut Context<MpiComm>) -> Result<(), HaloError> {
    let mut info = Vec::new();
    ctx.print_topology_info(&mut info)?;
    let time = ctx.wall_clock_time();
    let name = ctx.filename("test", "dat");
    let err = ctx.err();
    err.write_all(&info)?;
    writeln!(err, "time in sec = {time}")?;
    writeln!(err, "filename    = {name}")?;

    let coord = coord_i32(ctx);

    let mut buf = [0i32; 4 * N];
    fill_send(&mut buf, coord);
    let pending = ctx.begin_directional(Axis::X, ExchangeBuffer::from_elems(&mut buf, N)?);
    let directional = ctx.wait(pending);
    show(ctx.err(), "results of directional send/recv", &buf)?;
    directional?;

    let mut bufs = [[0i32; 4 * N]; 3];
    for b in &mut bufs {
        fill_send(b, coord);
    }
    let [b0, b1, b2] = &mut bufs;
    let pending = ctx.begin_all(
        ExchangeBuffer::from_elems(b0, N)?,
        ExchangeBuffer::from_elems(b1, N)?,
        ExchangeBuffer::from_elems(b2, N)?,
    );
    let all = ctx.wait(pending);
    for (axis, b) in Axis::ALL.iter().zip(&bufs) {
        show(ctx.err(), &format!("results of send/recv in dir. {axis}"), b)?;
    }
    all.map(|_| ())
}

fn main() {
    let program = std::env::args().next().unwrap_or_else(|| "halo_info".to_owned());
    let config = match std::env::args().nth(1) {
        Some(path) => DecompositionConfig::from_json_file(Path::new(&path)).unwrap_or_else(|e| {
            eprintln!("halo_info: {e}");
            std::process::exit(1)
        }),
        None => DecompositionConfig::new([4, 4, 1], [true, false, false]),
    };

    let comm = MpiComm::new().unwrap_or_else(|e| {
        eprintln!("halo_info: {e}");
        std::process::exit(1)
    });
    let mut ctx = Context::initialize_or_exit(comm, &program, &config);
    if let Err(e) = run(&mut ctx) {
        let _ = writeln!(ctx.err(), "halo_info: {e}");
    }
    if let Err(e) = ctx.finalize() {
        eprintln!("halo_info: {e}");
        std::process::exit(1);
    }
}
