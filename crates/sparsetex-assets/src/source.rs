//! Image Sources
//!
//! Decoders producing `TextureDescriptor`s from files. Orientation is left
//! as stored; callers flip rows with `TextureDescriptor::flipped_vertically`
//! when they need bottom-up data.

use std::io::Cursor;
use std::path::Path;

use ddsfile::{D3DFormat, Dds, DxgiFormat};
use glam::UVec3;
use image::RgbaImage;
use image::imageops::{self, FilterType};
use sparsetex_core::{PixelFormat, mip_byte_size, mip_extent};

use crate::descriptor::{MipLevel, TextureDescriptor};
use crate::{AssetError, AssetResult, ImageKind};

/// Anything that can turn a file into a mip pyramid
pub trait ImageSource: Send + Sync {
    /// Decode the image at `path`
    fn load(&self, path: &Path) -> AssetResult<TextureDescriptor>;
}

fn read_file(path: &Path) -> AssetResult<Vec<u8>> {
    std::fs::read(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => AssetError::NotFound(path.display().to_string()),
        _ => AssetError::IoError(err),
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// DirectDraw Surface loader
///
/// Only uncompressed 32-bit RGBA/BGRA surfaces are accepted; block
/// compressed formats cannot be uploaded into RGBA8 storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct DdsImageSource;

impl DdsImageSource {
    /// Decode a DDS file held in memory
    pub fn decode(name: &str, bytes: &[u8]) -> AssetResult<TextureDescriptor> {
        let mut cursor = Cursor::new(bytes);
        let dds = Dds::read(&mut cursor)
            .map_err(|err| AssetError::ImportFailed(format!("{name}: dds read failed: {err}")))?;

        let format = Self::pixel_format(&dds).ok_or_else(|| {
            let described = dds
                .get_dxgi_format()
                .map(|f| format!("{f:?}"))
                .or_else(|| dds.get_d3d_format().map(|f| format!("{f:?}")))
                .unwrap_or_else(|| "unknown".to_string());
            AssetError::UnsupportedFormat(format!("{name}: {described}"))
        })?;

        let extent = UVec3::new(dds.get_width(), dds.get_height(), dds.get_depth().max(1));
        let levels = dds.get_num_mipmap_levels().max(1);
        let data = dds
            .get_data(0)
            .map_err(|err| AssetError::ImportFailed(format!("{name}: {err}")))?;

        let mut mips = Vec::with_capacity(levels as usize);
        let mut offset = 0;
        for level in 0..levels {
            let level_extent = mip_extent(extent, level);
            let size = mip_byte_size(level_extent, format);
            let bytes = data.get(offset..offset + size).ok_or_else(|| {
                AssetError::InvalidData(format!("{name}: mip {level} truncated"))
            })?;
            mips.push(MipLevel {
                extent: level_extent,
                data: bytes.to_vec(),
            });
            offset += size;
        }

        log::debug!("Decoded {name}: {extent} {format}, {levels} mips");
        TextureDescriptor::new(name, format, extent, mips)
    }

    fn pixel_format(dds: &Dds) -> Option<PixelFormat> {
        if let Some(dxgi) = dds.get_dxgi_format() {
            return match dxgi {
                DxgiFormat::R8G8B8A8_UNorm => Some(PixelFormat::Rgba8Unorm),
                DxgiFormat::R8G8B8A8_UNorm_sRGB => Some(PixelFormat::Rgba8Srgb),
                DxgiFormat::B8G8R8A8_UNorm => Some(PixelFormat::Bgra8Unorm),
                DxgiFormat::R8_UNorm => Some(PixelFormat::R8Unorm),
                DxgiFormat::R8G8_UNorm => Some(PixelFormat::Rg8Unorm),
                DxgiFormat::R16G16B16A16_Float => Some(PixelFormat::Rgba16Float),
                _ => None,
            };
        }
        match dds.get_d3d_format()? {
            D3DFormat::A8B8G8R8 => Some(PixelFormat::Rgba8Unorm),
            D3DFormat::A8R8G8B8 => Some(PixelFormat::Bgra8Unorm),
            _ => None,
        }
    }
}

impl ImageSource for DdsImageSource {
    fn load(&self, path: &Path) -> AssetResult<TextureDescriptor> {
        let bytes = read_file(path)?;
        Self::decode(&display_name(path), &bytes)
    }
}

/// PNG/JPEG/TGA/BMP loader
///
/// Decodes to RGBA8 and, unless disabled, builds the rest of the pyramid
/// with a triangle filter.
#[derive(Debug, Clone, Copy)]
pub struct RasterImageSource {
    /// Generate the full mip chain
    pub generate_mips: bool,
}

impl Default for RasterImageSource {
    fn default() -> Self {
        Self {
            generate_mips: true,
        }
    }
}

impl RasterImageSource {
    /// Decode an encoded raster image held in memory
    pub fn decode(&self, name: &str, bytes: &[u8]) -> AssetResult<TextureDescriptor> {
        let image = image::load_from_memory(bytes)?.into_rgba8();
        self.build(name, image)
    }

    /// Build a descriptor from an already decoded image
    pub fn build(&self, name: &str, image: RgbaImage) -> AssetResult<TextureDescriptor> {
        let extent = UVec3::new(image.width(), image.height(), 1);
        let levels = if self.generate_mips {
            sparsetex_core::eval_num_mips(extent)
        } else {
            1
        };

        let mut mips = Vec::with_capacity(levels as usize);
        let mut current = image;
        for level in 0..levels {
            if level > 0 {
                let next = mip_extent(extent, level);
                current = imageops::resize(&current, next.x, next.y, FilterType::Triangle);
            }
            mips.push(MipLevel {
                extent: mip_extent(extent, level),
                data: current.as_raw().clone(),
            });
        }

        TextureDescriptor::new(name, PixelFormat::Rgba8Unorm, extent, mips)
    }
}

impl ImageSource for RasterImageSource {
    fn load(&self, path: &Path) -> AssetResult<TextureDescriptor> {
        let bytes = read_file(path)?;
        self.decode(&display_name(path), &bytes)
    }
}

/// Dispatches to the DDS or raster loader by file extension
#[derive(Debug, Default, Clone, Copy)]
pub struct FileImageSource {
    pub dds: DdsImageSource,
    pub raster: RasterImageSource,
}

impl ImageSource for FileImageSource {
    fn load(&self, path: &Path) -> AssetResult<TextureDescriptor> {
        match ImageKind::from_path(path) {
            Some(ImageKind::Dds) => self.dds.load(path),
            Some(ImageKind::Raster) => self.raster.load(path),
            None => Err(AssetError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddsfile::{AlphaMode, D3D10ResourceDimension, NewDxgiParams};
    use image::{DynamicImage, ImageOutputFormat, Rgba};

    fn encode_dds(width: u32, height: u32, levels: u32, format: DxgiFormat) -> Vec<u8> {
        let mut dds = Dds::new_dxgi(NewDxgiParams {
            height,
            width,
            depth: None,
            format,
            mipmap_levels: Some(levels),
            array_layers: None,
            caps2: None,
            is_cubemap: false,
            resource_dimension: D3D10ResourceDimension::Texture2D,
            alpha_mode: AlphaMode::Straight,
        })
        .unwrap();

        let base = UVec3::new(width, height, 1);
        dds.data = (0..levels)
            .flat_map(|level| {
                let size = mip_byte_size(mip_extent(base, level), PixelFormat::Rgba8Unorm);
                std::iter::repeat(level as u8).take(size)
            })
            .collect();

        let mut out = Vec::new();
        dds.write(&mut out).unwrap();
        out
    }

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([200, 100, 50, 255]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_dds_with_mips() {
        let bytes = encode_dds(16, 8, 5, DxgiFormat::R8G8B8A8_UNorm);
        let desc = DdsImageSource::decode("test.dds", &bytes).unwrap();

        assert_eq!(desc.format(), PixelFormat::Rgba8Unorm);
        assert_eq!(desc.extent(), UVec3::new(16, 8, 1));
        assert_eq!(desc.mip_count(), 5);
        assert!(desc.is_complete());
        assert_eq!(desc.mip(3).unwrap().extent, UVec3::new(2, 1, 1));
        assert!(desc.data(3).unwrap().iter().all(|&b| b == 3));
    }

    #[test]
    fn test_decode_dds_bgra() {
        let bytes = encode_dds(4, 4, 1, DxgiFormat::B8G8R8A8_UNorm);
        let desc = DdsImageSource::decode("bgra.dds", &bytes).unwrap();
        assert_eq!(desc.format(), PixelFormat::Bgra8Unorm);
        assert_eq!(desc.mip_count(), 1);
    }

    #[test]
    fn test_decode_dds_rejects_compressed() {
        let mut dds = Dds::new_dxgi(NewDxgiParams {
            height: 8,
            width: 8,
            depth: None,
            format: DxgiFormat::BC1_UNorm,
            mipmap_levels: Some(1),
            array_layers: None,
            caps2: None,
            is_cubemap: false,
            resource_dimension: D3D10ResourceDimension::Texture2D,
            alpha_mode: AlphaMode::Straight,
        })
        .unwrap();
        dds.data = vec![0; 32];
        let mut bytes = Vec::new();
        dds.write(&mut bytes).unwrap();

        let result = DdsImageSource::decode("bc1.dds", &bytes);
        assert!(matches!(result, Err(AssetError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_decode_garbage_dds() {
        let result = DdsImageSource::decode("junk.dds", b"not a dds file");
        assert!(matches!(result, Err(AssetError::ImportFailed(_))));
    }

    #[test]
    fn test_raster_generates_mips() {
        let bytes = encode_png(64, 16);
        let desc = RasterImageSource::default().decode("test.png", &bytes).unwrap();

        assert_eq!(desc.format(), PixelFormat::Rgba8Unorm);
        assert_eq!(desc.mip_count(), 7);
        assert!(desc.is_complete());
        assert_eq!(desc.mip(6).unwrap().extent, UVec3::ONE);
        assert_eq!(&desc.data(6).unwrap()[..4], &[200, 100, 50, 255]);
    }

    #[test]
    fn test_raster_without_mips() {
        let bytes = encode_png(8, 8);
        let source = RasterImageSource {
            generate_mips: false,
        };
        let desc = source.decode("flat.png", &bytes).unwrap();
        assert_eq!(desc.mip_count(), 1);
        assert!(!desc.is_complete());
    }

    #[test]
    fn test_missing_file() {
        let result = FileImageSource::default().load(Path::new("does/not/exist.png"));
        assert!(matches!(result, Err(AssetError::NotFound(_))));
    }

    #[test]
    fn test_unknown_extension() {
        let result = FileImageSource::default().load(Path::new("scene.gltf"));
        assert!(matches!(result, Err(AssetError::UnsupportedFormat(_))));
    }
}
