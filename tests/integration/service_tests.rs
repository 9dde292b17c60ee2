//! Service integration tests.
//!
//! Tests verify:
//! - A miss generates once and populates both tiers
//! - Disk hits are promoted to memory without generating
//! - A failed disk write still serves and keeps the memory copy
//! - Graduated and forced clears affect the right tiers
//! - Pressure levels map to the right clears
//! - Preload warms the cache and skips resident entries

use std::time::Duration;

use tempfile::TempDir;

use thumbnail_engine::thumbnail::decode_image;
use thumbnail_engine::{
    CacheKey, PressureLevel, Thumbnail, ThumbnailOrigin, ThumbnailServiceConfig, ThumbnailSize,
};

use super::test_utils::{
    create_test_png, default_service, garbage_source, is_valid_jpeg, service_with,
    TrackingGenerator,
};

// =============================================================================
// Get-or-Generate
// =============================================================================

#[tokio::test]
async fn test_miss_generates_once_and_fills_both_tiers() {
    let dir = TempDir::new().unwrap();
    let (service, generator) = default_service(&dir).await;
    let size = ThumbnailSize::square(200);

    let thumb = service
        .get_thumbnail("A", create_test_png(600, 300), size)
        .await
        .expect("thumbnail should be generated");
    assert_eq!(thumb.dimensions(), (200, 100));
    assert_eq!(generator.calls(), 1);

    let stats = service.cache_stats().await;
    assert_eq!(stats.counts(), (1, 1));
    assert_eq!(stats.in_flight, 0);
    assert!(stats.memory_cost > 0);

    let on_disk = std::fs::read(dir.path().join("A_200x200.jpg")).unwrap();
    assert!(is_valid_jpeg(&on_disk));

    // Second call is served from memory
    let again = service
        .try_get_thumbnail("A", create_test_png(600, 300), size)
        .await
        .unwrap();
    assert_eq!(again.origin, ThumbnailOrigin::Memory);
    assert!(Thumbnail::ptr_eq(&thumb, &again.thumbnail));
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_cached_lookup_sees_generated_thumbnail() {
    let dir = TempDir::new().unwrap();
    let (service, _generator) = default_service(&dir).await;
    let size = ThumbnailSize::square(64);

    assert!(service.get_cached_thumbnail("A", size).is_none());
    service
        .get_thumbnail("A", create_test_png(128, 128), size)
        .await
        .unwrap();

    let cached = service.get_cached_thumbnail("A", size).unwrap();
    assert_eq!(cached.dimensions(), (64, 64));

    // Other sizes are other keys
    assert!(service
        .get_cached_thumbnail("A", ThumbnailSize::square(65))
        .is_none());
}

#[tokio::test]
async fn test_sizes_are_cached_independently() {
    let dir = TempDir::new().unwrap();
    let (service, generator) = default_service(&dir).await;
    let source = create_test_png(400, 400);

    let small = service
        .get_thumbnail("A", source.clone(), ThumbnailSize::square(50))
        .await
        .unwrap();
    let large = service
        .get_thumbnail("A", source, ThumbnailSize::square(150))
        .await
        .unwrap();

    assert_eq!(small.dimensions(), (50, 50));
    assert_eq!(large.dimensions(), (150, 150));
    assert_eq!(generator.calls(), 2);
    assert_eq!(service.cache_stats().await.counts(), (2, 2));
}

#[tokio::test]
async fn test_decode_failure_resolves_absent_and_allows_retry() {
    let dir = TempDir::new().unwrap();
    let (service, generator) = default_service(&dir).await;
    let size = ThumbnailSize::square(100);

    assert!(service
        .get_thumbnail("E", garbage_source(), size)
        .await
        .is_none());
    assert_eq!(service.in_flight_count(), 0);
    assert_eq!(service.cache_stats().await.counts(), (0, 0));

    // Failure is not cached
    let thumb = service
        .get_thumbnail("E", create_test_png(50, 50), size)
        .await;
    assert!(thumb.is_some());
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_memory_tier_limits_apply_through_service() {
    let dir = TempDir::new().unwrap();
    let generator = TrackingGenerator::new();
    let config = ThumbnailServiceConfig::default().with_memory_limits(2, 64 * 1024 * 1024);
    let service = service_with(&dir, config, &generator).await;
    let size = ThumbnailSize::square(32);

    for source_id in ["a", "b", "c"] {
        service
            .get_thumbnail(source_id, create_test_png(64, 64), size)
            .await
            .unwrap();
    }

    assert_eq!(service.cache_stats().await.counts(), (2, 3));
    // Least recently used entry went first
    assert!(service.get_cached_thumbnail("a", size).is_none());
    assert!(service.get_cached_thumbnail("c", size).is_some());
}

// =============================================================================
// Disk Tier
// =============================================================================

#[tokio::test]
async fn test_disk_hit_promotes_without_generating() {
    let dir = TempDir::new().unwrap();
    let size = ThumbnailSize::square(120);

    {
        let (first, _generator) = default_service(&dir).await;
        first
            .get_thumbnail("C", create_test_png(240, 120), size)
            .await
            .unwrap();
    }

    // Fresh process: empty memory tier, same directory
    let (service, generator) = default_service(&dir).await;
    assert!(service.get_cached_thumbnail("C", size).is_none());

    let response = service
        .try_get_thumbnail("C", create_test_png(240, 120), size)
        .await
        .unwrap();
    assert_eq!(response.origin, ThumbnailOrigin::Disk);
    assert_eq!(response.thumbnail.dimensions(), (120, 60));
    assert_eq!(generator.calls(), 0);

    assert!(service.get_cached_thumbnail("C", size).is_some());
    let again = service
        .try_get_thumbnail("C", create_test_png(240, 120), size)
        .await
        .unwrap();
    assert_eq!(again.origin, ThumbnailOrigin::Memory);
}

#[tokio::test]
async fn test_corrupt_disk_entry_is_regenerated() {
    let dir = TempDir::new().unwrap();
    let (service, generator) = default_service(&dir).await;
    let size = ThumbnailSize::square(64);
    let path = service.disk().path_for(&CacheKey::new("D", size));
    std::fs::write(&path, b"truncated garbage").unwrap();

    let response = service
        .try_get_thumbnail("D", create_test_png(64, 64), size)
        .await
        .unwrap();
    assert_eq!(response.origin, ThumbnailOrigin::Generated);
    assert_eq!(generator.calls(), 1);

    let repaired = std::fs::read(&path).unwrap();
    assert!(decode_image(&repaired).is_ok());
}

#[tokio::test]
async fn test_disk_write_failure_keeps_memory_copy() {
    let dir = TempDir::new().unwrap();
    let (service, generator) = default_service(&dir).await;
    let size = ThumbnailSize::square(50);

    // The disk tier can no longer be written
    std::fs::remove_dir_all(dir.path()).unwrap();

    let thumb = service
        .get_thumbnail("lost", create_test_png(100, 100), size)
        .await
        .expect("disk failure must not fail the request");
    assert_eq!(thumb.dimensions(), (50, 50));

    let cached = service.get_cached_thumbnail("lost", size).unwrap();
    assert!(Thumbnail::ptr_eq(&thumb, &cached));
    assert!(!dir.path().join("lost_50x50.jpg").exists());

    let again = service
        .try_get_thumbnail("lost", create_test_png(100, 100), size)
        .await
        .unwrap();
    assert_eq!(again.origin, ThumbnailOrigin::Memory);
    assert_eq!(generator.calls(), 1);
    assert_eq!(service.in_flight_count(), 0);
}

#[tokio::test]
async fn test_disk_entries_use_key_as_file_stem() {
    let dir = TempDir::new().unwrap();
    let (service, _generator) = default_service(&dir).await;

    service
        .get_thumbnail("IMG_0001", create_test_png(30, 30), ThumbnailSize::new(20, 10))
        .await
        .unwrap();
    assert!(dir.path().join("IMG_0001_20x10.jpg").exists());

    // Ids that are not filename-safe are hashed
    service
        .get_thumbnail("photos/2024/a b", create_test_png(30, 30), ThumbnailSize::square(20))
        .await
        .unwrap();
    let key = CacheKey::new("photos/2024/a b", ThumbnailSize::square(20));
    let path = service.disk().path_for(&key);
    assert!(path.exists());
    assert_eq!(path.parent(), Some(dir.path()));
}

#[tokio::test]
async fn test_prune_removes_expired_entries() {
    let dir = TempDir::new().unwrap();
    let generator = TrackingGenerator::new();
    let config = ThumbnailServiceConfig::default().with_disk_retention(Duration::from_secs(60));
    let service = service_with(&dir, config, &generator).await;
    let size = ThumbnailSize::square(16);

    for source_id in ["old", "new"] {
        service
            .get_thumbnail(source_id, create_test_png(32, 32), size)
            .await
            .unwrap();
    }

    let old_path = service.disk().path_for(&CacheKey::new("old", size));
    let file = std::fs::File::options().write(true).open(&old_path).unwrap();
    let two_hours_ago = std::time::SystemTime::now() - Duration::from_secs(7200);
    file.set_times(std::fs::FileTimes::new().set_modified(two_hours_ago))
        .unwrap();
    drop(file);

    assert_eq!(service.prune_disk().await.unwrap(), 1);
    assert!(!old_path.exists());
    assert_eq!(service.cache_stats().await.disk_count, 1);
}

// =============================================================================
// Clears and Pressure
// =============================================================================

#[tokio::test]
async fn test_clear_cache_keeps_disk_tier() {
    let dir = TempDir::new().unwrap();
    let (service, generator) = default_service(&dir).await;
    let size = ThumbnailSize::square(200);

    service
        .get_thumbnail("A", create_test_png(300, 300), size)
        .await
        .unwrap();
    service.clear_cache();

    assert!(service.get_cached_thumbnail("A", size).is_none());
    assert!(dir.path().join("A_200x200.jpg").exists());
    assert_eq!(service.cache_stats().await.counts(), (0, 1));

    let response = service
        .try_get_thumbnail("A", create_test_png(300, 300), size)
        .await
        .unwrap();
    assert_eq!(response.origin, ThumbnailOrigin::Disk);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_force_clear_wipes_both_tiers() {
    let dir = TempDir::new().unwrap();
    let (service, generator) = default_service(&dir).await;
    let size = ThumbnailSize::square(80);

    for source_id in ["x", "y"] {
        service
            .get_thumbnail(source_id, create_test_png(100, 100), size)
            .await
            .unwrap();
    }
    service.force_clear_all_caches().await;

    assert_eq!(service.cache_stats().await.counts(), (0, 0));

    let response = service
        .try_get_thumbnail("x", create_test_png(100, 100), size)
        .await
        .unwrap();
    assert_eq!(response.origin, ThumbnailOrigin::Generated);
    assert_eq!(generator.calls(), 3);
}

#[tokio::test]
async fn test_pressure_levels() {
    let dir = TempDir::new().unwrap();
    let (service, _generator) = default_service(&dir).await;
    let size = ThumbnailSize::square(40);

    service
        .get_thumbnail("P", create_test_png(80, 80), size)
        .await
        .unwrap();

    service.handle_pressure(PressureLevel::Normal).await;
    assert_eq!(service.cache_stats().await.counts(), (1, 1));

    service.handle_pressure(PressureLevel::Moderate).await;
    assert_eq!(service.cache_stats().await.counts(), (0, 1));

    service
        .get_thumbnail("P", create_test_png(80, 80), size)
        .await
        .unwrap();
    assert_eq!(service.cache_stats().await.counts(), (1, 1));

    service.handle_pressure(PressureLevel::Critical).await;
    assert_eq!(service.cache_stats().await.counts(), (0, 0));
}

#[tokio::test]
async fn test_clear_on_empty_cache_is_noop() {
    let dir = TempDir::new().unwrap();
    let (service, _generator) = default_service(&dir).await;

    service.clear_cache();
    service.force_clear_all_caches().await;

    let stats = service.cache_stats().await;
    assert_eq!(stats.counts(), (0, 0));
    assert_eq!(stats.permits_available, 2);
}

// =============================================================================
// Preload
// =============================================================================

#[tokio::test]
async fn test_preload_warms_cache_and_skips_resident() {
    let dir = TempDir::new().unwrap();
    let generator = TrackingGenerator::new();
    let config = ThumbnailServiceConfig::default().with_preload_delay(Duration::from_millis(5));
    let service = service_with(&dir, config, &generator).await;
    let size = ThumbnailSize::square(48);

    service
        .get_thumbnail("p0", create_test_png(96, 96), size)
        .await
        .unwrap();
    assert_eq!(generator.calls(), 1);

    let sources = vec![
        ("p0".to_string(), create_test_png(96, 96)),
        ("p1".to_string(), create_test_png(96, 96)),
        ("p2".to_string(), create_test_png(96, 96)),
        ("bad".to_string(), garbage_source()),
    ];
    let loaded = service.preload_thumbnails(sources, size).await.unwrap();

    assert_eq!(loaded, 3);
    // p0 was already resident; p1, p2 and bad reached the generator
    assert_eq!(generator.calls(), 4);
    for source_id in ["p0", "p1", "p2"] {
        assert!(service.get_cached_thumbnail(source_id, size).is_some());
    }
    assert!(service.get_cached_thumbnail("bad", size).is_none());
}

#[tokio::test]
async fn test_preload_runs_one_at_a_time() {
    let dir = TempDir::new().unwrap();
    let generator = TrackingGenerator::with_delay(Duration::from_millis(20));
    let config = ThumbnailServiceConfig::default().with_preload_delay(Duration::ZERO);
    let service = service_with(&dir, config, &generator).await;

    let sources = (0..4)
        .map(|i| (format!("seq{}", i), create_test_png(40, 40)))
        .collect();
    let loaded = service
        .preload_thumbnails(sources, ThumbnailSize::square(20))
        .await
        .unwrap();

    assert_eq!(loaded, 4);
    assert_eq!(generator.peak(), 1);
}
