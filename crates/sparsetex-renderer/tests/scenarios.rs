//! End-to-end residency scenarios driven through the manager

use std::time::Duration;

use glam::UVec3;
use sparsetex_assets::{Checkerboard, TextureDescriptor};
use sparsetex_core::{
    PixelFormat, ReclaimPolicy, ResidencyConfig, TextureTarget, UnsupportedFormatPolicy,
};
use sparsetex_renderer::{
    Admission, DeviceOp, EvictionPhase, EvictionStep, RendererError, ResidencyManager,
    SoftwareDevice, SoftwareDeviceConfig,
};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// 16x16 boards (five mips) on a device with 8x8 pages: mips 0 and 1
/// cover a page, mip 2 does not
fn small_page_manager(config: ResidencyConfig) -> ResidencyManager<SoftwareDevice> {
    let device = SoftwareDevice::new(SoftwareDeviceConfig::default().with_page_size(
        TextureTarget::Texture2D,
        PixelFormat::Rgba8Unorm,
        UVec3::new(8, 8, 1),
    ));
    ResidencyManager::new(device, config).unwrap()
}

fn board(name: &str) -> TextureDescriptor {
    Checkerboard::new(16, 16).with_cell(4).build(name).unwrap()
}

fn config(cap: usize) -> ResidencyConfig {
    ResidencyConfig {
        admission_cap: cap,
        tick_interval_ms: 500,
        ..ResidencyConfig::default()
    }
}

#[test]
fn test_three_slots_commit_two_mips() {
    let mut manager = small_page_manager(config(3));
    let boards = [board("a"), board("b"), board("c")];
    assert!(boards.iter().all(|desc| desc.mip_count() == 5));

    for (frame, desc) in boards.iter().enumerate() {
        assert_eq!(manager.eviction().phase(), EvictionPhase::Admitting);
        let report = manager.frame(ms(frame as u64 * 16), Some(desc)).unwrap();
        assert!(matches!(report.admission, Some(Admission::Admitted(_))));
    }

    assert_eq!(manager.eviction().phase(), EvictionPhase::EvictingMips);
    assert_eq!(manager.eviction().min_mip(), 0);
    for slot in manager.table().slots() {
        assert!(slot.is_sparse());
        assert_eq!(slot.committed_base_mip(), 0);
        assert_eq!(slot.committed_max_mip(), 1);
        assert_eq!(slot.geometry().unwrap().max_sparse_level, 1);
    }
}

#[test]
fn test_mip_eviction_stops_at_max_sparse_level() {
    let mut manager = small_page_manager(config(3));
    for (frame, name) in ["a", "b", "c"].iter().enumerate() {
        manager.frame(ms(frame as u64), Some(&board(name))).unwrap();
    }
    let start = manager.eviction().last_tick();

    let step = manager.tick(start + ms(500)).unwrap();
    assert_eq!(step, EvictionStep::MipEvicted { mip: 0, slots: 3 });
    assert_eq!(manager.eviction().min_mip(), 1);
    for slot in manager.table().slots() {
        assert_eq!(slot.committed_base_mip(), 1);
        assert_eq!(manager.device().base_level(slot.texture()), Some(1));
        assert_eq!(manager.device().committed_pages(slot.texture(), 0), 0);
    }

    let pages_before = manager.stats().committed_pages;
    let step = manager.tick(start + ms(1000)).unwrap();
    assert_eq!(step, EvictionStep::MipsExhausted);
    assert_eq!(manager.eviction().min_mip(), 1);
    assert_eq!(manager.stats().committed_pages, pages_before);
    for slot in manager.table().slots() {
        assert_eq!(slot.committed_base_mip(), 1);
    }
}

#[test]
fn test_admission_rejected_at_cap() {
    let mut manager = small_page_manager(config(3));
    for name in ["a", "b", "c"] {
        manager.try_admit(&board(name)).unwrap();
    }

    let textures: Vec<_> = manager.table().slots().map(|slot| slot.texture()).collect();
    let ops_before = manager.device().ops().len();

    assert_eq!(manager.try_admit(&board("d")).unwrap(), Admission::Rejected);
    assert_eq!(manager.table().len(), 3);
    assert_eq!(
        manager.table().slots().map(|slot| slot.texture()).collect::<Vec<_>>(),
        textures
    );
    assert_eq!(manager.device().ops().len(), ops_before);
}

#[test]
fn test_same_instant_tick_is_noop() {
    let mut manager = small_page_manager(config(1));
    manager.frame(ms(0), Some(&board("a"))).unwrap();

    assert_ne!(manager.tick(ms(500)).unwrap(), EvictionStep::Idle);
    let ops = manager.device().ops().len();
    let min_mip = manager.eviction().min_mip();

    assert_eq!(manager.tick(ms(500)).unwrap(), EvictionStep::Idle);
    assert_eq!(manager.tick(ms(999)).unwrap(), EvictionStep::Idle);
    assert_eq!(manager.device().ops().len(), ops);
    assert_eq!(manager.eviction().min_mip(), min_mip);
}

#[test]
fn test_empty_page_sizes_never_commit() {
    let device = SoftwareDevice::new(
        SoftwareDeviceConfig::default()
            .without_pages(TextureTarget::Texture2D, PixelFormat::Rgba8Unorm),
    );
    let mut manager = ResidencyManager::new(device, config(2)).unwrap();

    let report = manager.frame(ms(0), Some(&board("a"))).unwrap();
    assert!(matches!(report.admission, Some(Admission::Admitted(_))));
    assert!(
        !manager
            .device()
            .ops()
            .iter()
            .any(|op| matches!(op, DeviceOp::Commit { .. }))
    );
    let slot = manager.table().slots().next().unwrap();
    assert!(!slot.is_sparse());
    assert_eq!(slot.committed_max_mip(), 4);
}

#[test]
fn test_empty_page_sizes_rejected_by_policy() {
    let device = SoftwareDevice::new(
        SoftwareDeviceConfig::default()
            .without_pages(TextureTarget::Texture2D, PixelFormat::Rgba8Unorm),
    );
    let config = ResidencyConfig {
        unsupported_format: UnsupportedFormatPolicy::Reject,
        ..config(2)
    };
    let mut manager = ResidencyManager::new(device, config).unwrap();

    let result = manager.try_admit(&board("a"));
    assert!(matches!(result, Err(RendererError::UnsupportedFormat { .. })));
    assert!(manager.table().is_empty());
    assert_eq!(manager.device().texture_count(), 0);
    assert!(manager.is_admitting());
}

#[test]
fn test_long_run_invariants() {
    let device = SoftwareDevice::new(SoftwareDeviceConfig {
        max_resident_handles: 1,
        ..SoftwareDeviceConfig::default()
    });
    let config = ResidencyConfig {
        admission_cap: 4,
        tick_interval_ms: 500,
        reclaim_policy: ReclaimPolicy::OldestFirst,
        min_resident_slots: 2,
        ..ResidencyConfig::default()
    };
    let mut manager = ResidencyManager::new(device, config).unwrap();
    let images: Vec<TextureDescriptor> = [1024u32, 512, 2048, 256, 1024, 512]
        .iter()
        .enumerate()
        .map(|(i, size)| {
            Checkerboard::new(*size, *size)
                .build(format!("board{i}"))
                .unwrap()
        })
        .collect();

    let mut last_min_mip = 0;
    let mut bases = std::collections::HashMap::new();
    for frame in 0..400u64 {
        let now = ms(frame * 16);
        let next = images.get(frame as usize);
        let report = manager.frame(now, next).unwrap();

        assert!(manager.table().len() <= 4);
        assert!(manager.eviction().min_mip() >= last_min_mip);
        last_min_mip = manager.eviction().min_mip();

        for slot in manager.table().slots() {
            assert!(slot.committed_base_mip() <= slot.committed_max_mip());
            assert!(slot.committed_max_mip() < slot.mip_count());
            let previous = bases.insert(slot.id(), slot.committed_base_mip());
            assert!(previous.is_none_or(|base| base <= slot.committed_base_mip()));
        }

        if let Some(active) = report.active {
            assert_eq!(manager.device().resident_handle_count(), 1);
            manager
                .device()
                .validate_sampling(active.handle.unwrap())
                .unwrap();
        }
    }

    // Fifth and sixth images arrived after admission closed
    assert_eq!(manager.eviction().phase(), EvictionPhase::Exhausted);
    assert_eq!(manager.table().len(), 2);
    // 256 limits the lockstep eviction to mip 1
    assert_eq!(manager.eviction().min_mip(), 1);
    assert_eq!(manager.device().committed_bytes(), manager.stats().committed_bytes);
}

#[test]
fn test_atlas_single_image() {
    let mut manager = ResidencyManager::new(
        SoftwareDevice::new(SoftwareDeviceConfig::default()),
        ResidencyConfig::atlas(),
    )
    .unwrap();
    let photo = Checkerboard::new(1000, 600).base_level_only().build("photo").unwrap();

    let report = manager.frame(ms(0), Some(&photo)).unwrap();
    assert!(matches!(report.admission, Some(Admission::Admitted(_))));
    assert!(!manager.is_admitting());

    let active = report.active.unwrap();
    let slot = manager.table().get(active.id).unwrap();
    assert_eq!(slot.target(), TextureTarget::Texture2DArray);
    // Only mip 0 was supplied; the rest is generated, not committed
    assert_eq!(active.material.mip_range(), (0, 0));
    assert!(
        manager
            .device()
            .ops()
            .contains(&DeviceOp::GenerateMipmaps(slot.texture()))
    );
    // A single mip leaves nothing to evict
    assert_eq!(manager.tick(ms(500)).unwrap(), EvictionStep::MipsExhausted);
}
