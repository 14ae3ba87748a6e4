//! The `model_loaded` gauge agrees with the handle after racing reloads.

use bikeshare_livelab::dataset::generate_synthetic_frame;
use bikeshare_livelab::labels::LabelRule;
use bikeshare_livelab::metrics::ServiceMetrics;
use bikeshare_livelab::models::artifacts;
use bikeshare_livelab::models::inference::ModelHandle;
use bikeshare_livelab::models::trainer::{train, TrainOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn gauge(metrics: &ServiceMetrics) -> Option<f64> {
    metrics
        .render()
        .lines()
        .find_map(|line| line.strip_prefix("model_loaded "))
        .and_then(|value| value.trim().parse().ok())
}

fn expected(handle: &ModelHandle) -> Option<f64> {
    Some(if handle.status().loaded { 1.0 } else { 0.0 })
}

#[test]
fn test_gauge_matches_model_after_concurrent_reloads() {
    let metrics = ServiceMetrics::install().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let frame = generate_synthetic_frame(120, 9);
    let rule = LabelRule::synthetic();
    let outcome = train(&frame, &rule.apply(&frame), &rule, &TrainOptions::default()).unwrap();
    artifacts::save(dir.path(), &outcome).unwrap();

    let handle = Arc::new(ModelHandle::new(dir.path()));
    assert!(handle.load().loaded);
    assert_eq!(gauge(&metrics), Some(1.0));

    let stop = Arc::new(AtomicBool::new(false));
    let reloaders: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let _ = handle.reload();
                }
            })
        })
        .collect();

    let model_path = dir.path().join(artifacts::MODEL_FILE);
    for _ in 0..30 {
        let _ = std::fs::remove_file(&model_path);
        artifacts::save(dir.path(), &outcome).unwrap();
    }
    let _ = std::fs::remove_file(&model_path);

    stop.store(true, Ordering::Relaxed);
    for reloader in reloaders {
        reloader.join().unwrap();
    }
    assert_eq!(gauge(&metrics), expected(&handle));

    assert!(handle.reload().is_err());
    assert_eq!(gauge(&metrics), Some(0.0));

    artifacts::save(dir.path(), &outcome).unwrap();
    assert!(handle.reload().is_ok());
    assert_eq!(gauge(&metrics), Some(1.0));
}
