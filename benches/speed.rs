//! Wear-level allocation and write throughput benchmark. Requires
//! `--no-default-features` for `MemoryFlash` to be available (see
//! `tests/fs_invariants.rs`).

use criterion::{criterion_group, criterion_main, AxisScale, BatchSize, BenchmarkId, Criterion, PlotConfiguration, Throughput};

use trackerfw::fs::{FileSystem, OpenMode};
use trackerfw::storage::mock::MemoryFlash;
use typenum::consts::U4096;

type Flash = MemoryFlash<U4096>;
type Fs = FileSystem<Flash, 64, 32, 8>;

fn bench_wear_level_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("wear-level allocation");
    let plot_config = PlotConfiguration::default().summary_scale(AxisScale::Logarithmic);
    group.plot_config(plot_config);

    // Creating and closing a file repeatedly forces `pick_free_sector` to
    // scan every header's allocation counter each time.
    group.bench_function(BenchmarkId::new("create+close", 64), |b| {
        b.iter_batched(
            || {
                let mut flash = Flash::new(64);
                let mut fs = Fs::mount(&mut flash).unwrap();
                fs.format(&mut flash).unwrap();
                (fs, flash)
            },
            |(mut fs, mut flash)| {
                for file_id in 0..64u8 {
                    let h = fs.open(&mut flash, file_id, OpenMode::Create, 0).unwrap();
                    fs.close(&mut flash, h).unwrap();
                    fs.delete(&mut flash, file_id).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    let usable = Fs::usable_bytes_per_sector();
    for file_count in [1usize, 8, 32] {
        let bytes_per_file = usable * 3; // spans multiple sectors per file
        group.throughput(Throughput::Bytes((bytes_per_file * file_count) as u64));
        group.bench_with_input(BenchmarkId::new("write spanning sectors", file_count), &file_count, |b, &file_count| {
            b.iter_batched(
                || {
                    let mut flash = Flash::new(64);
                    let mut fs = Fs::mount(&mut flash).unwrap();
                    fs.format(&mut flash).unwrap();
                    (fs, flash, vec![0xABu8; bytes_per_file])
                },
                |(mut fs, mut flash, payload)| {
                    for file_id in 0..file_count as u8 {
                        let h = fs.open(&mut flash, file_id, OpenMode::Create, 0).unwrap();
                        fs.write(&mut flash, h, &payload).unwrap();
                        fs.close(&mut flash, h).unwrap();
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, bench_wear_level_allocation);
criterion_main!(benches);
