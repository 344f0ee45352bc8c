use std::io;

use dtf_composer_core::config::ComposeConfig;
use dtf_composer_core::pipeline::{compose_job, compose_layout, CancelToken, JobSpec, JobStatus};
use dtf_composer_core::model::ResolvedItem;
use dtf_composer_core::sizing::SizingProfile;
use dtf_composer_core::storage::{FsStorage, MemStorage, RetryPolicy, Storage};
use image::RgbaImage;

fn png_bytes(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
    let mut img = RgbaImage::new(w, h);
    for px in img.pixels_mut() {
        *px = image::Rgba(rgba);
    }
    let mut out = Vec::new();
    img.write_with_encoder(image::codecs::png::PngEncoder::new(&mut out))
        .expect("encode");
    out
}

fn item(pos: u32, w: f64, h: f64) -> ResolvedItem {
    ResolvedItem {
        id: format!("it-{pos}"),
        sku: "TS-1".into(),
        picklist_position: pos,
        artwork_width_px: (w * 10.0).round() as u32,
        artwork_height_px: (h * 10.0).round() as u32,
        artwork_dpi: 300,
        artwork_format: "png".into(),
        artwork_handle: format!("art/{pos}.png"),
    }
}

fn profiles() -> Vec<SizingProfile> {
    vec![SizingProfile {
        sku_prefix: "TS".into(),
        target_width_mm: 100.0,
        is_default: true,
    }]
}

fn seed_artwork(store: &MemStorage, items: &[ResolvedItem]) {
    for it in items {
        store
            .put(
                &it.artwork_handle,
                &png_bytes(it.artwork_width_px, it.artwork_height_px, [10, 200, 50, 255]),
            )
            .expect("seed artwork");
    }
}

fn spec_with(items: Vec<ResolvedItem>, cfg: ComposeConfig) -> JobSpec {
    let mut spec = JobSpec::new("acme", "job-1", items, profiles(), cfg);
    spec.retry = RetryPolicy::immediate();
    spec
}

#[test]
fn completed_job_writes_every_artifact_and_the_manifest() {
    let items = vec![item(1, 100.0, 150.0), item(2, 100.0, 150.0)];
    let store = MemStorage::new();
    seed_artwork(&store, &items);
    let spec = spec_with(items, ComposeConfig::default());

    let outcome = compose_job(&spec, &store, &CancelToken::new());
    assert_eq!(outcome.status, JobStatus::Completed);
    assert!(outcome.manifest.errors.is_empty());
    assert_eq!(
        outcome.manifest.outputs.artifacts,
        vec!["tenant/acme/outputs/job-1/base_1.png".to_string()]
    );
    assert_eq!(
        store.keys(),
        vec![
            "art/1.png".to_string(),
            "art/2.png".to_string(),
            "tenant/acme/outputs/job-1/base_1.png".to_string(),
            "tenant/acme/outputs/job-1/manifest.json".to_string(),
        ]
    );

    // The artifact decodes to the expected raster size: 600 mm wide and
    // content plus bottom margin (190 mm) tall at 300 dpi.
    let png = store
        .get("tenant/acme/outputs/job-1/base_1.png")
        .expect("artifact");
    let img = image::load_from_memory(&png).expect("decode");
    assert_eq!(img.width(), 7087);
    assert_eq!(img.height(), (190.0 / 25.4 * 300.0_f64).round() as u32);
}

#[test]
fn reruns_are_byte_identical_when_reproducible() {
    let cfg = ComposeConfig::builder().reproducible(true).build();
    let items = vec![item(1, 100.0, 150.0), item(2, 80.0, 120.0)];

    let mut artifacts = Vec::new();
    for _ in 0..2 {
        let store = MemStorage::new();
        seed_artwork(&store, &items);
        let spec = spec_with(items.clone(), cfg.clone());
        let outcome = compose_job(&spec, &store, &CancelToken::new());
        assert_eq!(outcome.status, JobStatus::Completed);
        artifacts.push((
            store.get("tenant/acme/outputs/job-1/base_1.png").expect("artifact"),
            store.get("tenant/acme/outputs/job-1/manifest.json").expect("manifest"),
        ));
    }
    assert_eq!(artifacts[0].0, artifacts[1].0);
    assert_eq!(artifacts[0].1, artifacts[1].1);
}

#[test]
fn low_dpi_item_fails_the_job_without_artifacts() {
    let mut bad = item(2, 100.0, 100.0);
    bad.artwork_dpi = 150;
    let items = vec![item(1, 100.0, 100.0), bad];
    let store = MemStorage::new();
    seed_artwork(&store, &items);
    let spec = spec_with(items, ComposeConfig::default());

    let outcome = compose_job(&spec, &store, &CancelToken::new());
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.manifest.errors.len(), 1);
    assert_eq!(outcome.manifest.errors[0].code, "LOW_DPI");
    assert_eq!(outcome.manifest.sizing.invalid_items, 1);
    assert_eq!(outcome.manifest.packing.total_bases, 0);
    // Nothing beyond the seeded artwork was written.
    assert_eq!(store.keys(), vec!["art/1.png".to_string(), "art/2.png".to_string()]);
}

/// Storage that accepts artwork but rejects writes for chosen keys.
struct RejectingStore {
    inner: MemStorage,
    reject_substring: String,
}

impl Storage for RejectingStore {
    fn get(&self, key: &str) -> io::Result<Vec<u8>> {
        self.inner.get(key)
    }
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        if key.contains(&self.reject_substring) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.inner.put(key, bytes)
    }
    fn remove(&self, key: &str) -> io::Result<()> {
        self.inner.remove(key)
    }
}

#[test]
fn failed_write_leaves_no_partial_artifacts() {
    // A narrow machine forces one item per base; the second write fails,
    // and the first is rolled back.
    let cfg = ComposeConfig::builder().machine(150.0, 200.0, 300).build();
    let items = vec![item(1, 100.0, 150.0), item(2, 100.0, 150.0)];
    let store = RejectingStore {
        inner: MemStorage::new(),
        reject_substring: "base_2".into(),
    };
    seed_artwork(&store.inner, &items);
    let spec = spec_with(items, cfg);

    let outcome = compose_job(&spec, &store, &CancelToken::new());
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.manifest.errors[0].code, "STORAGE_WRITE_FAIL");
    assert!(outcome.manifest.outputs.artifacts.is_empty());
    assert_eq!(
        store.inner.keys(),
        vec!["art/1.png".to_string(), "art/2.png".to_string()]
    );
}

#[test]
fn exceeding_the_soft_deadline_fails_with_timeout() {
    let items = vec![item(1, 100.0, 100.0)];
    let store = MemStorage::new();
    seed_artwork(&store, &items);
    // A zero-second deadline has already passed by the first check.
    let cfg = ComposeConfig::builder().soft_deadline_secs(Some(0)).build();
    let spec = spec_with(items, cfg);

    let outcome = compose_job(&spec, &store, &CancelToken::new());
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.manifest.errors[0].code, "TIMEOUT");
    assert_eq!(store.keys(), vec!["art/1.png".to_string()]);
}

#[test]
fn cancellation_is_observed_between_stages() {
    let items = vec![item(1, 100.0, 100.0)];
    let store = MemStorage::new();
    seed_artwork(&store, &items);
    let spec = spec_with(items, ComposeConfig::default());
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = compose_job(&spec, &store, &cancel);
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.manifest.errors[0].code, "CANCELLED");
    assert_eq!(store.keys(), vec!["art/1.png".to_string()]);
}

#[test]
fn filesystem_storage_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FsStorage::new(dir.path());
    let items = vec![item(1, 100.0, 150.0)];
    for it in &items {
        store
            .put(
                &it.artwork_handle,
                &png_bytes(it.artwork_width_px, it.artwork_height_px, [0, 0, 255, 255]),
            )
            .expect("seed");
    }
    let spec = spec_with(items, ComposeConfig::default());

    let outcome = compose_job(&spec, &store, &CancelToken::new());
    assert_eq!(outcome.status, JobStatus::Completed);
    let manifest_path = dir.path().join("tenant/acme/outputs/job-1/manifest.json");
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(manifest_path).expect("manifest on disk"))
            .expect("valid json");
    assert_eq!(manifest["packing"]["total_bases"], 1);
    assert!(dir
        .path()
        .join("tenant/acme/outputs/job-1/base_1.png")
        .exists());
}

#[test]
fn layout_and_full_pipeline_agree_on_geometry() {
    let cfg = ComposeConfig::default();
    let items: Vec<ResolvedItem> = (1..=8).map(|p| item(p, 90.0, 60.0)).collect();
    let store = MemStorage::new();
    seed_artwork(&store, &items);

    let layout = compose_layout(&items, profiles(), &cfg).expect("layout");
    let spec = spec_with(items, cfg);
    let outcome = compose_job(&spec, &store, &CancelToken::new());
    assert_eq!(outcome.status, JobStatus::Completed);

    let from_layout = &layout.manifest.packing;
    let from_job = &outcome.manifest.packing;
    assert_eq!(from_layout.total_bases, from_job.total_bases);
    for (a, b) in from_layout.bases.iter().zip(&from_job.bases) {
        assert_eq!(a.placements.len(), b.placements.len());
        for (pa, pb) in a.placements.iter().zip(&b.placements) {
            assert_eq!(pa.item_id, pb.item_id);
            assert_eq!(pa.x_mm, pb.x_mm);
            assert_eq!(pa.y_mm, pb.y_mm);
            assert_eq!(pa.width_mm, pb.width_mm);
            assert_eq!(pa.height_mm, pb.height_mm);
        }
    }
}
