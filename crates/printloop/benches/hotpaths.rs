use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use printloop::sim::{serpentine_plan, SerpentineSpec};
use printloop::{
    localize_profile, mark_boundary, measure_segment, ExtractConfig, MaterialModel, Pose,
    PrintPlan, ScanConfig,
};

fn make_plan() -> PrintPlan {
    serpentine_plan(&SerpentineSpec::default(), &MaterialModel::default())
        .expect("default serpentine is a valid plan")
}

/// Boundary bitmap with both edges of every rod, jittered by up to a pixel
/// and sprinkled with speckle noise.
fn make_boundary(plan: &PrintPlan, seed: u64) -> GrayImage {
    let raster = plan.raster;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = raster.blank();
    let (w, h) = img.dimensions();
    for seg in plan.segments.iter().filter(|s| s.roi.is_some()) {
        for wp in &seg.waypoints {
            let half = raster.mm_to_px_len(wp.width / 2.0);
            let c = raster.mm_to_px(wp.xy());
            for side in [-1.0, 1.0] {
                let x = c[0] + rng.gen_range(-1.0..1.0);
                let y = c[1] + side * half + rng.gen_range(-1.0..1.0);
                if x >= 0.0 && y >= 0.0 && (x as u32) < w && (y as u32) < h {
                    img.put_pixel(x as u32, y as u32, Luma([255]));
                }
            }
        }
    }
    for _ in 0..(w * h / 200) {
        img.put_pixel(rng.gen_range(0..w), rng.gen_range(0..h), Luma([255]));
    }
    img
}

fn bench_measure_segment(c: &mut Criterion) {
    let plan = make_plan();
    let boundary = make_boundary(&plan, 17);
    let cfg = ExtractConfig::default();
    let rod = plan
        .segments
        .iter()
        .find(|s| s.roi.is_some())
        .expect("serpentine has rods");

    c.bench_function("measure_segment_20mm_rod", |b| {
        b.iter(|| {
            let m = measure_segment(
                black_box(&boundary),
                black_box(rod),
                black_box(&plan.raster),
                black_box(&cfg),
            );
            black_box(m.width_errors.len())
        })
    });
}

fn bench_mark_boundary(c: &mut Criterion) {
    let plan = make_plan();
    let mask = plan.path_mask();
    let scan = ScanConfig::default();
    let rod = &plan.segments[0];
    let mid = rod.waypoints[rod.waypoints.len() * 3 / 4];
    let pose = Pose {
        x: mid.x,
        y: mid.y,
        z: mid.z,
        theta: 0.0,
    };
    let n = 240;
    let line = localize_profile(&pose, n, &plan.raster, &scan)
        .expect("profile lies inside the raster");
    let half = mid.width / 2.0;
    let profile: Vec<f64> = (0..n)
        .map(|i| {
            let local = -scan.scan_width_mm / 2.0 + i as f64 * scan.scan_width_mm / (n - 1) as f64;
            if local.abs() < half {
                0.4
            } else {
                0.0
            }
        })
        .collect();

    c.bench_function("mark_boundary_240_samples", |b| {
        let mut boundary = plan.raster.blank();
        b.iter(|| {
            black_box(mark_boundary(
                black_box(&line),
                black_box(&profile),
                black_box(&mask),
                black_box(&scan),
                &mut boundary,
            ))
        })
    });
}

criterion_group!(hotpaths, bench_measure_segment, bench_mark_boundary);
criterion_main!(hotpaths);
