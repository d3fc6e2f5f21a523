//! Categorical remapping through a [`MappingTable`].
//!
//! Every distinct source code is resolved against the table once and the
//! result reused for all of its pixels, so cost is one hash lookup per
//! pixel no matter how large the table is.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use class_mapping::{MappedClass, MappingTable};
use landcover_common::{
    BlockProducer, BlockWindow, RasterError, RasterResult, CODE_NODATA, CONFIDENCE_NODATA,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Switches for [`remap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapOptions {
    /// Also produce a confidence buffer.
    pub emit_confidence: bool,
    /// Send the table's uncertain code (cloud) to no-data.
    pub uncertain_to_nodata: bool,
    /// Source no-data; such pixels pass through as output no-data.
    pub source_nodata: Option<i32>,
}

/// What one source code turns into.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Resolution {
    Mapped(MappedClass),
    SourceNoData,
    Uncertain,
    Unmapped,
}

impl Resolution {
    fn code(&self) -> i16 {
        match self {
            Self::Mapped(m) => m.target,
            _ => CODE_NODATA,
        }
    }

    fn confidence(&self) -> f32 {
        match self {
            Self::Mapped(m) => m.confidence,
            _ => CONFIDENCE_NODATA,
        }
    }
}

/// Per-code memo over a shared table.
#[derive(Debug, Clone)]
pub struct CodeResolver {
    table: Arc<MappingTable>,
    uncertain: Option<i32>,
    source_nodata: Option<i32>,
    cache: HashMap<i32, Resolution>,
}

impl CodeResolver {
    pub fn new(table: Arc<MappingTable>, options: &RemapOptions) -> Self {
        let uncertain = if options.uncertain_to_nodata {
            table.uncertain_code()
        } else {
            None
        };
        Self {
            table,
            uncertain,
            source_nodata: options.source_nodata,
            cache: HashMap::new(),
        }
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    #[inline]
    fn resolve(&mut self, code: i32) -> Resolution {
        if let Some(r) = self.cache.get(&code) {
            return *r;
        }
        let r = if Some(code) == self.source_nodata {
            Resolution::SourceNoData
        } else if Some(code) == self.uncertain {
            Resolution::Uncertain
        } else {
            self.table
                .lookup(code)
                .map_or(Resolution::Unmapped, Resolution::Mapped)
        };
        self.cache.insert(code, r);
        r
    }
}

/// Running counts kept while remapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemapTally {
    /// Pixels whose code had no rule.
    pub unmapped_count: u64,
    /// Distinct codes that had no rule.
    pub unmapped_codes: BTreeSet<i32>,
    /// Pixels sent to no-data as uncertain.
    pub uncertain_count: u64,
    /// Output pixels per target code, no-data excluded.
    pub class_counts: BTreeMap<i16, u64>,
}

impl RemapTally {
    fn record(&mut self, source: i32, resolution: &Resolution) {
        match resolution {
            Resolution::Mapped(m) => *self.class_counts.entry(m.target).or_insert(0) += 1,
            Resolution::Unmapped => {
                self.unmapped_count += 1;
                self.unmapped_codes.insert(source);
            }
            Resolution::Uncertain => self.uncertain_count += 1,
            Resolution::SourceNoData => {}
        }
    }

    pub fn merge(&mut self, other: &RemapTally) {
        self.unmapped_count += other.unmapped_count;
        self.uncertain_count += other.uncertain_count;
        self.unmapped_codes.extend(other.unmapped_codes.iter().copied());
        for (code, n) in &other.class_counts {
            *self.class_counts.entry(*code).or_insert(0) += n;
        }
    }
}

/// Remapped codes plus bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapOutput {
    pub codes: Vec<i16>,
    pub confidence: Option<Vec<f32>>,
    pub tally: RemapTally,
}

impl RemapOutput {
    pub fn unmapped_count(&self) -> u64 {
        self.tally.unmapped_count
    }

    pub fn class_counts(&self) -> &BTreeMap<i16, u64> {
        &self.tally.class_counts
    }
}

/// Remap a whole buffer.
///
/// Codes without a rule become -9999 and are counted as unmapped; source
/// no-data becomes -9999 without being counted.
pub fn remap(source: &[i32], table: Arc<MappingTable>, options: &RemapOptions) -> RemapOutput {
    let mut resolver = CodeResolver::new(table, options);
    let mut tally = RemapTally::default();
    let mut codes = Vec::with_capacity(source.len());
    let mut confidence = options
        .emit_confidence
        .then(|| Vec::with_capacity(source.len()));

    for &code in source {
        let r = resolver.resolve(code);
        tally.record(code, &r);
        codes.push(r.code());
        if let Some(conf) = confidence.as_mut() {
            conf.push(r.confidence());
        }
    }

    debug!(
        table = %resolver.table().name(),
        pixels = source.len(),
        distinct = resolver.cache.len(),
        unmapped = tally.unmapped_count,
        "Remapped buffer"
    );

    RemapOutput {
        codes,
        confidence,
        tally,
    }
}

/// Streaming remap of an upstream code producer.
pub struct RemapStage<P> {
    upstream: P,
    resolver: CodeResolver,
    tally: RemapTally,
}

impl<P: BlockProducer<i32>> RemapStage<P> {
    pub fn new(upstream: P, table: Arc<MappingTable>, options: &RemapOptions) -> Self {
        Self {
            upstream,
            resolver: CodeResolver::new(table, options),
            tally: RemapTally::default(),
        }
    }

    /// Counts over every window produced so far.
    pub fn tally(&self) -> &RemapTally {
        &self.tally
    }

    pub fn into_tally(self) -> RemapTally {
        self.tally
    }
}

impl<P: BlockProducer<i32>> BlockProducer<i16> for RemapStage<P> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<i16>> {
        let src = self.upstream.produce(window)?;
        RasterError::check_len(window.pixel_count(), src.len())?;
        let mut out = Vec::with_capacity(src.len());
        for code in src {
            let r = self.resolver.resolve(code);
            self.tally.record(code, &r);
            out.push(r.code());
        }
        Ok(out)
    }
}

/// Streaming confidence for an upstream code producer.
pub struct ConfidenceStage<P> {
    upstream: P,
    resolver: CodeResolver,
}

impl<P: BlockProducer<i32>> ConfidenceStage<P> {
    pub fn new(upstream: P, table: Arc<MappingTable>, options: &RemapOptions) -> Self {
        Self {
            upstream,
            resolver: CodeResolver::new(table, options),
        }
    }
}

impl<P: BlockProducer<i32>> BlockProducer<f32> for ConfidenceStage<P> {
    fn produce(&mut self, window: &BlockWindow) -> RasterResult<Vec<f32>> {
        let src = self.upstream.produce(window)?;
        RasterError::check_len(window.pixel_count(), src.len())?;
        Ok(src
            .into_iter()
            .map(|code| self.resolver.resolve(code).confidence())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use class_mapping::systems::esri_table;
    use landcover_common::{
        collect_blocks, Crs, GeoTransform, GridGeometry, MemoryRaster, PixelType, RasterGrid,
    };

    fn table() -> Arc<MappingTable> {
        Arc::new(esri_table().unwrap())
    }

    #[test]
    fn test_remap_counts_unmapped_not_nodata() {
        let options = RemapOptions {
            emit_confidence: true,
            source_nodata: Some(-9999),
            ..Default::default()
        };
        let out = remap(&[1, 3, -9999, 7, 3], table(), &options);
        assert_eq!(out.codes, vec![98, -9999, -9999, 91, -9999]);
        assert_eq!(out.unmapped_count(), 2);
        assert_eq!(out.tally.unmapped_codes.iter().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(out.confidence.as_deref().unwrap(), &[0.95, 0.0, 0.0, 0.9, 0.0]);
        assert_eq!(out.class_counts()[&98], 1);
    }

    #[test]
    fn test_uncertain_code_to_nodata() {
        let keep = remap(&[10, 10], table(), &RemapOptions::default());
        assert_eq!(keep.codes, vec![183, 183]);
        assert!(keep.confidence.is_none());

        let options = RemapOptions {
            uncertain_to_nodata: true,
            emit_confidence: true,
            ..Default::default()
        };
        let drop = remap(&[10, 1], table(), &options);
        assert_eq!(drop.codes, vec![-9999, 98]);
        assert_eq!(drop.confidence.as_deref().unwrap()[0], 0.0);
        assert_eq!(drop.unmapped_count(), 0);
        assert_eq!(drop.tally.uncertain_count, 1);
    }

    #[test]
    fn test_stage_matches_whole_buffer() {
        let data: Vec<i32> = (0..40).map(|i| [1, 2, 7, 11, 3][i % 5]).collect();
        let geometry = GridGeometry::new(
            8,
            5,
            GeoTransform::from_origin(0.0, 5.0, 1.0, 1.0),
            Crs::Epsg(5070),
        )
        .unwrap();
        let grid = RasterGrid::new(geometry, None, PixelType::I32);
        let raster = MemoryRaster::new(grid, data.clone()).unwrap();

        let options = RemapOptions::default();
        let mut stage = RemapStage::new(raster.clone(), table(), &options);
        let streamed: Vec<i16> = collect_blocks(&mut stage, 8, 5, 2).unwrap();
        let whole = remap(&data, table(), &options);
        assert_eq!(streamed, whole.codes);
        assert_eq!(stage.tally(), &whole.tally);

        let mut conf = ConfidenceStage::new(raster, table(), &options);
        let confidence: Vec<f32> = collect_blocks(&mut conf, 8, 5, 3).unwrap();
        assert_eq!(confidence[0], 0.95);
        assert_eq!(confidence[4], 0.0);
    }
}
