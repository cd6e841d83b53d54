//! Headless frame loop
//!
//! Offers one image per frame to the residency manager until admission
//! closes, then keeps ticking so eviction runs its course. Every frame the
//! active slot is "drawn" by validating its handle against the software
//! device.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sparsetex_assets::{Checkerboard, FileImageSource, ImageCache, TextureDescriptor};
use sparsetex_core::{FrameClock, ResidencyConfig, RollingTimer, ScopedTimer};
use sparsetex_renderer::{
    Admission, DeviceCaps, EvictionStep, ResidencyManager, ResidencyReport, SoftwareDevice,
    SoftwareDeviceConfig,
};

/// Generated board sizes, cycled
const SYNTHETIC_SIZES: [u32; 4] = [1024, 512, 2048, 256];

/// Frame loop settings
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: ResidencyConfig,
    /// Images to admit; generated boards are used when empty
    pub images: Vec<PathBuf>,
    pub synthetic: usize,
    pub frames: u64,
    pub fps: f64,
    pub flip_rows: bool,
    pub bindless: bool,
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub frames: u64,
    pub simulated: Duration,
    pub loaded: usize,
    pub failed_loads: usize,
    pub admitted: usize,
    pub failed_admissions: usize,
    pub evicted_mips: usize,
    pub reclaimed: usize,
    pub draws: u64,
    pub report: ResidencyReport,
    pub average_frame: Duration,
    pub worst_frame: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames over {:?}: {}/{} images admitted ({} failed to load, {} refused), \
             {} mip evictions, {} slots reclaimed, {} slots left at min mip {} ({:?}), \
             peak {} KiB committed, {} draws, frame avg {:?} max {:?}",
            self.frames,
            self.simulated,
            self.admitted,
            self.loaded,
            self.failed_loads,
            self.failed_admissions,
            self.evicted_mips,
            self.reclaimed,
            self.report.slots,
            self.report.min_mip,
            self.report.phase,
            self.report.peak_bytes / 1024,
            self.draws,
            self.average_frame,
            self.worst_frame
        )
    }
}

/// Decode the requested images, or generate boards when none were given
///
/// Returns the images that loaded and the number that failed.
pub fn load_images(options: &RunOptions) -> Result<(Vec<Arc<TextureDescriptor>>, usize)> {
    if options.images.is_empty() {
        let boards = (0..options.synthetic)
            .map(|index| {
                let size = SYNTHETIC_SIZES[index % SYNTHETIC_SIZES.len()];
                Checkerboard::new(size, size)
                    .tinted()
                    .build(format!("checker{index}"))
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok((boards, 0));
    }

    let _timer = ScopedTimer::traced("preload");
    let cache = ImageCache::new(options.flip_rows);
    let mut loaded = Vec::with_capacity(options.images.len());
    let mut failed = 0;
    for (path, result) in options
        .images
        .iter()
        .zip(cache.preload(&options.images, &FileImageSource::default()))
    {
        match result {
            Ok(desc) => loaded.push(desc),
            Err(err) => {
                log::warn!("Skipping {}: {err}", path.display());
                failed += 1;
            }
        }
    }
    Ok((loaded, failed))
}

/// Run the frame loop
pub fn run(options: &RunOptions) -> Result<RunSummary> {
    let (images, failed_loads) = load_images(options)?;
    run_images(options, &images, failed_loads)
}

/// Run the frame loop over already loaded images
///
/// An image the manager cannot admit is skipped and counted; the run goes on
/// with the next one.
pub fn run_images(
    options: &RunOptions,
    images: &[Arc<TextureDescriptor>],
    failed_loads: usize,
) -> Result<RunSummary> {
    let mut device_config = SoftwareDeviceConfig::default();
    if !options.bindless {
        device_config.caps.remove(DeviceCaps::BINDLESS_TEXTURE);
    }
    let mut manager =
        ResidencyManager::new(SoftwareDevice::new(device_config), options.config.clone())?;

    let mut clock = FrameClock::from_hz(options.fps);
    let mut frame_times = RollingTimer::new(120);
    let mut next = 0;
    let mut admitted = 0;
    let mut failed_admissions = 0;
    let mut evicted_mips = 0;
    let mut reclaimed = 0;
    let mut draws = 0;

    for _ in 0..options.frames {
        let now = clock.advance();
        let _timer = ScopedTimer::new("frame", |_, elapsed| frame_times.record(elapsed));

        let step = manager.tick(now)?;
        if let Some(desc) = images.get(next).filter(|_| manager.is_admitting()) {
            match manager.try_admit(desc) {
                Ok(Admission::Admitted(_)) => {
                    admitted += 1;
                    next += 1;
                }
                Ok(Admission::Rejected) => {}
                Err(err) => {
                    log::warn!("Skipping {}: {err}", desc.name());
                    failed_admissions += 1;
                    next += 1;
                }
            }
        }
        let active = manager.select_next()?;

        match step {
            EvictionStep::Idle => {}
            EvictionStep::MipEvicted { .. } => evicted_mips += 1,
            EvictionStep::SlotReclaimed(_) => reclaimed += 1,
            EvictionStep::MipsExhausted | EvictionStep::Exhausted => {
                log::debug!("{now:?}: {step:?}")
            }
        }
        if let Some(active) = active {
            if let Some(handle) = active.handle {
                manager.device().validate_sampling(handle)?;
            }
            draws += 1;
        }
    }

    if manager.is_admitting() {
        log::info!(
            "Admission still open after {} frames: {} of {} slots filled",
            options.frames,
            manager.table().len(),
            manager.config().admission_cap
        );
    }

    let report = manager.report();
    manager.release()?;

    Ok(RunSummary {
        frames: options.frames,
        simulated: clock.now(),
        loaded: images.len(),
        failed_loads,
        admitted,
        failed_admissions,
        evicted_mips,
        reclaimed,
        draws,
        report,
        average_frame: frame_times.average(),
        worst_frame: frame_times.max(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparsetex_core::{PixelFormat, UVec3};
    use sparsetex_renderer::EvictionPhase;

    fn options(frames: u64) -> RunOptions {
        RunOptions {
            config: ResidencyConfig::quick(),
            images: Vec::new(),
            synthetic: 4,
            frames,
            fps: 60.0,
            flip_rows: true,
            bindless: true,
        }
    }

    #[test]
    fn test_synthetic_run_exhausts() {
        let summary = run(&options(120)).unwrap();

        assert_eq!(summary.loaded, 4);
        assert_eq!(summary.admitted, 3);
        // 1024, 512 and 2048 boards: the 512 one limits eviction to mip 2
        assert_eq!(summary.evicted_mips, 2);
        assert_eq!(summary.reclaimed, 2);
        assert_eq!(summary.report.slots, 1);
        assert_eq!(summary.report.min_mip, 2);
        assert_eq!(summary.report.phase, EvictionPhase::Exhausted);
        assert_eq!(summary.draws, 120);
    }

    #[test]
    fn test_classic_binding_run() {
        let summary = run(&RunOptions {
            bindless: false,
            ..options(10)
        })
        .unwrap();
        assert_eq!(summary.admitted, 3);
        assert_eq!(summary.report.resident_handles, 1);
    }

    #[test]
    fn test_missing_images_are_skipped() {
        let summary = run(&RunOptions {
            images: vec![PathBuf::from("does/not/exist.png")],
            ..options(5)
        })
        .unwrap();
        assert_eq!(summary.failed_loads, 1);
        assert_eq!(summary.admitted, 0);
        assert_eq!(summary.draws, 0);
    }

    #[test]
    fn test_unadmittable_image_is_skipped() {
        // Single-channel data cannot go into RGBA8 storage
        let gray = TextureDescriptor::from_base_level(
            "gray",
            PixelFormat::R8Unorm,
            UVec3::new(256, 256, 1),
            vec![0; 256 * 256],
        )
        .unwrap();
        let board = Checkerboard::new(512, 512).build("board").unwrap();
        let images = [Arc::new(gray), Arc::new(board)];

        let summary = run_images(&options(10), &images, 0).unwrap();
        assert_eq!(summary.failed_admissions, 1);
        assert_eq!(summary.admitted, 1);
        assert_eq!(summary.report.slots, 1);
        // Frame 1 refuses the gray image, frame 2 admits the board
        assert_eq!(summary.draws, 9);
    }

    #[test]
    fn test_summary_display() {
        let summary = run(&options(3)).unwrap();
        let text = summary.to_string();
        assert!(text.starts_with("3 frames"));
        assert!(text.contains("3/4 images admitted"));
    }
}
