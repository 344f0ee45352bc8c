use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dtf_composer_core::config::{ComposeConfig, PackMode};
use dtf_composer_core::model::{ResolvedItem, SizedItem};
use dtf_composer_core::packer::pack_items;

fn generate_items(count: usize) -> Vec<SizedItem> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    (0..count)
        .map(|i| {
            let w = rng.gen_range(40.0..=300.0_f64);
            let h = rng.gen_range(40.0..=400.0_f64);
            SizedItem {
                item: ResolvedItem {
                    id: format!("it-{i}"),
                    sku: format!("SKU-{i}"),
                    picklist_position: i as u32 + 1,
                    artwork_width_px: (w * 10.0) as u32,
                    artwork_height_px: (h * 10.0) as u32,
                    artwork_dpi: 300,
                    artwork_format: "png".into(),
                    artwork_handle: format!("art/{i}.png"),
                },
                final_width_mm: w,
                final_height_mm: h,
                scale_applied: 1.0,
            }
        })
        .collect()
}

fn bench_pack_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack_strategies");

    for count in [50, 100, 200] {
        let items = generate_items(count);
        group.throughput(Throughput::Elements(count as u64));

        for mode in [PackMode::Sequence, PackMode::Optimize] {
            let cfg = ComposeConfig::builder().mode(mode).build();
            group.bench_with_input(
                BenchmarkId::new(format!("{mode:?}"), count),
                &items,
                |b, items| {
                    b.iter(|| {
                        let layout = pack_items(items, &cfg).expect("packs");
                        black_box(layout)
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_pack_modes);
criterion_main!(benches);
