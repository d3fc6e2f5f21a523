//! File-backed rasters through the `tiff` crate.
//!
//! Reads strip- or tile-organised single- or multi-sample TIFFs (first band
//! only) with decoded chunks held in a [`ChunkCache`]. Writes deflate
//! compressed strips pulled from a [`BlockProducer`] into a temporary file
//! next to the destination, which is persisted only once the encoder has
//! finished.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use class_mapping::MappingTable;
use landcover_common::{
    block_windows, BlockProducer, BlockWindow, BoundingBox, Crs, GeoTransform, GridGeometry,
    PixelType, RasterError, RasterGrid, RasterResult, RasterSource, CODE_NODATA,
};
use num_traits::{NumCast, ToPrimitive};
use projection::Reprojector;
use serde::{Deserialize, Serialize};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{
    ColorType, Gray16, Gray32, Gray32Float, Gray64Float, Gray8, GrayI16, GrayI32, GrayI8,
};
use tiff::encoder::compression::Deflate;
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tracing::{debug, info, instrument};

use crate::backend::{
    convert_source, footprint_bounds, ConversionReport, RasterBackend, RasterValidation,
    SourceHandle, SystemInfo, WriteReport,
};
use crate::cache::{CacheStats, ChunkCache};
use crate::error::{BackendError, BackendResult};
use crate::geokeys;

/// Settings for [`GeoTiffBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoTiffConfig {
    /// Decoded chunk cache per open reader, in bytes.
    pub cache_bytes: usize,
    /// Pixels inspected when computing a data footprint.
    pub footprint_samples: usize,
}

impl Default for GeoTiffConfig {
    fn default() -> Self {
        Self {
            cache_bytes: 64 * 1024 * 1024,
            footprint_samples: 1_000_000,
        }
    }
}

/// Everything read from a TIFF header.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTiffMetadata {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub pixel_type: PixelType,
    pub crs: Option<Crs>,
    pub transform: Option<GeoTransform>,
    pub nodata: Option<f64>,
    pub file_size: u64,
}

fn open_decoder(path: &Path) -> BackendResult<(Decoder<BufReader<File>>, u64)> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackendError::not_found(path)
        } else {
            BackendError::open_failed(path, e)
        }
    })?;
    let file_size = file.metadata()?.len();
    let decoder =
        Decoder::new(BufReader::new(file)).map_err(|e| BackendError::open_failed(path, e))?;
    Ok((decoder, file_size))
}

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn read_metadata<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
    file_size: u64,
) -> BackendResult<GeoTiffMetadata> {
    let open_err = |e: tiff::TiffError| BackendError::open_failed(path, e);

    let (width, height) = decoder.dimensions().map_err(open_err)?;
    // Single SHORT values decode as `Unsigned`, lists as `Short`.
    let u16_tag = |d: &mut Decoder<R>, t: Tag| -> BackendResult<Option<Vec<u16>>> {
        d.find_tag_unsigned_vec::<u16>(t).map_err(open_err)
    };
    let f64_tag = |d: &mut Decoder<R>, t: Tag| -> BackendResult<Option<Vec<f64>>> {
        d.find_tag(t)
            .map_err(open_err)?
            .map(|v| v.into_f64_vec())
            .transpose()
            .map_err(open_err)
    };
    let ascii_tag = |d: &mut Decoder<R>, t: Tag| -> BackendResult<Option<String>> {
        d.find_tag(t)
            .map_err(open_err)?
            .map(|v| v.into_string())
            .transpose()
            .map_err(open_err)
    };

    let bits = u16_tag(decoder, Tag::BitsPerSample)?
        .and_then(|v| v.first().copied())
        .unwrap_or(1);
    let format = u16_tag(decoder, Tag::SampleFormat)?
        .and_then(|v| v.first().copied())
        .unwrap_or(1);
    let band_count = u16_tag(decoder, Tag::SamplesPerPixel)?
        .and_then(|v| v.first().copied())
        .unwrap_or(1) as usize;
    let pixel_type = u8::try_from(bits)
        .ok()
        .and_then(|b| PixelType::from_tiff(b, format))
        .ok_or_else(|| {
            BackendError::unsupported(
                path,
                format!("{}-bit samples with sample format {}", bits, format),
            )
        })?;

    let scale = f64_tag(decoder, tag(geokeys::MODEL_PIXEL_SCALE))?;
    let tiepoint = f64_tag(decoder, tag(geokeys::MODEL_TIEPOINT))?;
    let matrix = f64_tag(decoder, tag(geokeys::MODEL_TRANSFORMATION))?;
    let transform =
        geokeys::transform_from_tags(scale.as_deref(), tiepoint.as_deref(), matrix.as_deref());

    let directory = u16_tag(decoder, tag(geokeys::GEO_KEY_DIRECTORY))?;
    let ascii = ascii_tag(decoder, tag(geokeys::GEO_ASCII_PARAMS))?;
    let crs = directory.and_then(|d| geokeys::decode(&d, ascii.as_deref()));

    let nodata = ascii_tag(decoder, tag(geokeys::GDAL_NODATA))?
        .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok());

    Ok(GeoTiffMetadata {
        width: width as usize,
        height: height as usize,
        band_count,
        pixel_type,
        crs,
        transform,
        nodata,
        file_size,
    })
}

fn to_samples(result: DecodingResult) -> Vec<f64> {
    fn widen<T: ToPrimitive>(v: Vec<T>) -> Vec<f64> {
        v.into_iter().map(|x| x.to_f64().unwrap_or(f64::NAN)).collect()
    }
    match result {
        DecodingResult::U8(v) => widen(v),
        DecodingResult::U16(v) => widen(v),
        DecodingResult::U32(v) => widen(v),
        DecodingResult::U64(v) => widen(v),
        DecodingResult::I8(v) => widen(v),
        DecodingResult::I16(v) => widen(v),
        DecodingResult::I32(v) => widen(v),
        DecodingResult::I64(v) => widen(v),
        DecodingResult::F32(v) => widen(v),
        DecodingResult::F64(v) => v,
    }
}

/// Random-access reader over one GeoTIFF.
pub struct GeoTiffReader {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    metadata: GeoTiffMetadata,
    grid: RasterGrid,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    /// Samples interleaved per pixel inside a chunk.
    chunk_samples: usize,
    cache: ChunkCache,
}

impl GeoTiffReader {
    /// Open a georeferenced raster.
    pub fn open(path: &Path, cache_bytes: usize) -> BackendResult<Self> {
        Self::open_as(path, cache_bytes, None)
    }

    /// Open a raster, substituting `crs` for whatever the file declares.
    fn open_as(path: &Path, cache_bytes: usize, crs: Option<Crs>) -> BackendResult<Self> {
        let (mut decoder, file_size) = open_decoder(path)?;
        let metadata = read_metadata(&mut decoder, path, file_size)?;

        let crs = crs
            .or_else(|| metadata.crs.clone())
            .ok_or_else(|| BackendError::missing_spatial_reference(path))?;
        let transform = metadata
            .transform
            .ok_or_else(|| BackendError::missing_spatial_reference(path))?;
        let geometry = GridGeometry::new(metadata.width, metadata.height, transform, crs)?;
        let grid = RasterGrid::new(geometry, metadata.nodata, metadata.pixel_type);

        let (cw, ch) = decoder.chunk_dimensions();
        let (chunk_width, chunk_height) = (cw.max(1) as usize, ch.max(1) as usize);
        let planar = decoder
            .find_tag(Tag::PlanarConfiguration)
            .map_err(|e| BackendError::open_failed(path, e))?
            .and_then(|v| v.into_u16().ok())
            .unwrap_or(1);
        // Separate planes store band 1 in the first chunks, one sample each.
        let chunk_samples = if planar == 2 { 1 } else { metadata.band_count.max(1) };

        debug!(
            path = %path.display(),
            width = metadata.width,
            height = metadata.height,
            pixel_type = %metadata.pixel_type,
            chunk_width,
            chunk_height,
            "Opened GeoTIFF"
        );

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            chunks_across: metadata.width.div_ceil(chunk_width),
            cache: ChunkCache::new(cache_bytes, chunk_width * chunk_height * chunk_samples),
            metadata,
            grid,
            chunk_width,
            chunk_height,
            chunk_samples,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &GeoTiffMetadata {
        &self.metadata
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Decoded chunk and its row stride in pixels.
    fn chunk(&mut self, index: u32) -> RasterResult<(Arc<Vec<f64>>, usize)> {
        let (data_w, data_h) = self.decoder.chunk_data_dimensions(index);
        let samples = match self.cache.get(index) {
            Some(s) => s,
            None => {
                let decoded = self
                    .decoder
                    .read_chunk(index)
                    .map_err(|e| RasterError::read_failed(format!("chunk {}: {}", index, e)))?;
                let s = Arc::new(to_samples(decoded));
                self.cache.insert(index, s.clone());
                s
            }
        };
        // Edge tiles may come back cropped or padded to the full tile.
        let stride = if samples.len() == data_w as usize * data_h as usize * self.chunk_samples {
            data_w as usize
        } else {
            self.chunk_width
        };
        Ok((samples, stride))
    }

    /// Read a window of first-band samples.
    pub fn read_samples(&mut self, window: &BlockWindow) -> RasterResult<Vec<f64>> {
        window.check_within(self.metadata.width, self.metadata.height)?;
        let mut out = vec![0.0; window.pixel_count()];

        let first_row = window.row_off / self.chunk_height;
        let last_row = (window.row_end() - 1) / self.chunk_height;
        let first_col = window.col_off / self.chunk_width;
        let last_col = (window.col_end() - 1) / self.chunk_width;

        for cr in first_row..=last_row {
            for cc in first_col..=last_col {
                let index = (cr * self.chunks_across + cc) as u32;
                let (samples, stride) = self.chunk(index)?;
                let (y0, x0) = (cr * self.chunk_height, cc * self.chunk_width);

                let rows = window.row_off.max(y0)..window.row_end().min(y0 + self.chunk_height);
                let cols = window.col_off.max(x0)..window.col_end().min(x0 + self.chunk_width);
                for row in rows {
                    for col in cols.clone() {
                        let at = ((row - y0) * stride + (col - x0)) * self.chunk_samples;
                        let value = samples.get(at).copied().ok_or_else(|| {
                            RasterError::read_failed(format!("chunk {} is truncated", index))
                        })?;
                        out[(row - window.row_off) * window.cols + (col - window.col_off)] = value;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Read a window converted to `T`.
    pub fn read_window_as<T: NumCast>(&mut self, window: &BlockWindow) -> RasterResult<Vec<T>> {
        let pixel_type = self.metadata.pixel_type;
        self.read_samples(window)?
            .into_iter()
            .map(|v| {
                T::from(v).ok_or_else(|| RasterError::ValueOutOfRange {
                    value: v.to_string(),
                    pixel_type: pixel_type.to_string(),
                })
            })
            .collect()
    }
}

impl RasterSource for GeoTiffReader {
    fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    fn read_window(&mut self, window: &BlockWindow) -> RasterResult<Vec<i32>> {
        self.read_window_as(window)
    }
}

/// Reader windows converted to one sample type.
struct TypedBlocks<'a, T> {
    reader: &'a mut GeoTiffReader,
    _sample: PhantomData<T>,
}

impl<'a, T> TypedBlocks<'a, T> {
    fn new(reader: &'a mut GeoTiffReader) -> Self {
        Self {
            reader,
            _sample: PhantomData,
        }
    }
}

impl<T: NumCast> BlockProducer<T> for TypedBlocks<'_, T> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<T>> {
        self.reader.read_window_as(window)
    }
}

/// Encode `geometry`-sized strips pulled from `producer` into `path`.
fn write_raster<C>(
    path: &Path,
    geometry: &GridGeometry,
    nodata: Option<&str>,
    producer: &mut dyn BlockProducer<C::Inner>,
    block_rows: usize,
) -> BackendResult<WriteReport>
where
    C: ColorType,
    [C::Inner]: TiffValue,
{
    let (width, height) = (geometry.width, geometry.height);
    let rows = block_rows.clamp(1, height);
    let fail = |e: &dyn std::fmt::Display| BackendError::write_failed(path, e);

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".reconcile-")
        .suffix(".tif.part")
        .tempfile_in(&dir)?;

    let windows = block_windows(width, height, rows, width);
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        {
            let mut encoder = TiffEncoder::new(&mut writer).map_err(|e| fail(&e))?;
            let mut image = encoder
                .new_image_with_compression::<C, _>(width as u32, height as u32, Deflate::default())
                .map_err(|e| fail(&e))?;

            let (scale, tiepoint) = geokeys::model_tags(&geometry.transform);
            let keys = geokeys::encode(&geometry.crs);
            let dir_encoder = image.encoder();
            dir_encoder
                .write_tag(tag(geokeys::MODEL_PIXEL_SCALE), &scale[..])
                .map_err(|e| fail(&e))?;
            dir_encoder
                .write_tag(tag(geokeys::MODEL_TIEPOINT), &tiepoint[..])
                .map_err(|e| fail(&e))?;
            dir_encoder
                .write_tag(tag(geokeys::GEO_KEY_DIRECTORY), &keys.directory[..])
                .map_err(|e| fail(&e))?;
            if let Some(ascii) = &keys.ascii {
                dir_encoder
                    .write_tag(tag(geokeys::GEO_ASCII_PARAMS), ascii.as_str())
                    .map_err(|e| fail(&e))?;
            }
            if let Some(nodata) = nodata {
                dir_encoder
                    .write_tag(tag(geokeys::GDAL_NODATA), nodata)
                    .map_err(|e| fail(&e))?;
            }

            image.rows_per_strip(rows as u32).map_err(|e| fail(&e))?;
            for window in &windows {
                let block = producer.produce(window)?;
                RasterError::check_len(window.pixel_count(), block.len())?;
                image.write_strip(&block).map_err(|e| fail(&e))?;
            }
            image.finish().map_err(|e| fail(&e))?;
        }
        writer.flush()?;
    }

    tmp.persist(path).map_err(|e| fail(&e.error))?;
    let bytes = fs::metadata(path)?.len();
    info!(
        path = %path.display(),
        width,
        height,
        blocks = windows.len(),
        bytes,
        "Wrote GeoTIFF"
    );

    Ok(WriteReport {
        path: path.to_path_buf(),
        width,
        height,
        blocks: windows.len(),
        bytes,
    })
}

/// Write everything `reader` holds back to `path` as `C` samples, under
/// the reader's grid.
fn rewrite_as<C>(reader: &mut GeoTiffReader, path: &Path) -> BackendResult<WriteReport>
where
    C: ColorType,
    C::Inner: NumCast,
    [C::Inner]: TiffValue,
{
    let geometry = reader.grid().geometry.clone();
    let nodata = reader.metadata().nodata.map(|v| v.to_string());
    let rows = reader.chunk_height.max(1);
    let mut blocks = TypedBlocks::<C::Inner>::new(reader);
    write_raster::<C>(path, &geometry, nodata.as_deref(), &mut blocks, rows)
}

/// [`RasterBackend`] over GeoTIFF files on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct GeoTiffBackend {
    config: GeoTiffConfig,
}

impl GeoTiffBackend {
    pub fn new(config: GeoTiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeoTiffConfig {
        &self.config
    }

    pub fn reader(&self, path: &Path) -> BackendResult<GeoTiffReader> {
        GeoTiffReader::open(path, self.config.cache_bytes)
    }

    /// Header details without requiring georeferencing.
    pub fn inspect(&self, path: &Path) -> BackendResult<GeoTiffMetadata> {
        let (mut decoder, file_size) = open_decoder(path)?;
        read_metadata(&mut decoder, path, file_size)
    }
}

impl RasterBackend for GeoTiffBackend {
    fn name(&self) -> &'static str {
        "geotiff"
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn validate(&self, path: &Path) -> BackendResult<RasterValidation> {
        let m = self.inspect(path)?;
        let validation = RasterValidation::new(
            path,
            m.width,
            m.height,
            m.band_count,
            m.pixel_type,
            m.crs,
            m.nodata,
            m.transform,
            m.file_size,
        );
        debug!(warnings = validation.warnings.len(), "Validated raster");
        Ok(validation)
    }

    #[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
    fn convert_to_optimized_format(
        &self,
        input: &Path,
        output: &Path,
        table: Option<Arc<MappingTable>>,
        block_rows: usize,
    ) -> BackendResult<ConversionReport> {
        convert_source(self, self.open(input)?, output, table, block_rows)
    }

    fn system_info(&self) -> SystemInfo {
        SystemInfo::new(self.name(), &["GTiff"])
    }

    fn bounds(&self, path: &Path, reprojector: &Reprojector) -> BackendResult<BoundingBox> {
        let mut reader = self.reader(path)?;
        footprint_bounds(&mut reader, reprojector, self.config.footprint_samples, path)
    }

    fn open(&self, path: &Path) -> BackendResult<SourceHandle> {
        Ok(Box::new(self.reader(path)?))
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn write_codes(
        &self,
        path: &Path,
        geometry: &GridGeometry,
        producer: &mut dyn BlockProducer<i16>,
        block_rows: usize,
    ) -> BackendResult<WriteReport> {
        let nodata = CODE_NODATA.to_string();
        write_raster::<GrayI16>(path, geometry, Some(&nodata), producer, block_rows)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn write_confidence(
        &self,
        path: &Path,
        geometry: &GridGeometry,
        producer: &mut dyn BlockProducer<f32>,
        block_rows: usize,
    ) -> BackendResult<WriteReport> {
        write_raster::<Gray32Float>(path, geometry, Some("0"), producer, block_rows)
    }

    fn spatial_reference(&self, path: &Path) -> BackendResult<Option<Crs>> {
        Ok(self.inspect(path)?.crs)
    }

    /// Re-encodes the file with the new geokeys; TIFF directories cannot be
    /// patched in place by the encoder. Samples keep their type and the
    /// no-data tag is carried over as found. Only the first band is kept.
    #[instrument(skip_all, fields(path = %path.display(), crs = %crs))]
    fn set_spatial_reference(&self, path: &Path, crs: &Crs) -> BackendResult<()> {
        let mut reader = GeoTiffReader::open_as(path, self.config.cache_bytes, Some(crs.clone()))?;
        let pixel_type = reader.metadata().pixel_type;
        let report = match pixel_type {
            PixelType::U8 => rewrite_as::<Gray8>(&mut reader, path)?,
            PixelType::I8 => rewrite_as::<GrayI8>(&mut reader, path)?,
            PixelType::U16 => rewrite_as::<Gray16>(&mut reader, path)?,
            PixelType::I16 => rewrite_as::<GrayI16>(&mut reader, path)?,
            PixelType::U32 => rewrite_as::<Gray32>(&mut reader, path)?,
            PixelType::I32 => rewrite_as::<GrayI32>(&mut reader, path)?,
            PixelType::F32 => rewrite_as::<Gray32Float>(&mut reader, path)?,
            PixelType::F64 => rewrite_as::<Gray64Float>(&mut reader, path)?,
        };
        info!(pixel_type = %pixel_type, bytes = report.bytes, "Spatial reference updated");
        Ok(())
    }

    fn remove(&self, path: &Path) -> BackendResult<()> {
        fs::remove_file(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::not_found(path)
            } else {
                BackendError::Io(e)
            }
        })
    }
}
