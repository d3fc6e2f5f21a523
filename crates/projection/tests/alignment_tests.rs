//! Alignment and reprojection behaviour across the public API.

use landcover_common::{BoundingBox, Crs, GeoTransform, GridGeometry, PixelType, RasterGrid};
use projection::{
    CategoricalResampling, GridAligner, GridAlignmentSpec, Reprojector, ReprojectorConfig,
};
use test_utils::{create_patch_grid, lattice};

/// Deterministic sequence of extents scattered around CONUS.
fn scattered_bounds() -> Vec<BoundingBox> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % 1_000_000) as f64 / 1_000_000.0
    };

    (0..200)
        .map(|_| {
            let min_x = -2_300_000.0 + next() * 4_500_000.0;
            let min_y = 300_000.0 + next() * 2_800_000.0;
            let w = 1.0 + next() * 50_000.0;
            let h = 1.0 + next() * 50_000.0;
            BoundingBox::new(min_x, min_y, min_x + w, min_y + h)
        })
        .collect()
}

// ============================================================================
// Alignment invariants
// ============================================================================

#[test]
fn test_aligned_origin_on_lattice_and_contains_input() {
    for res in [10.0, 30.0, 45.0] {
        let aligner = GridAligner::new(GridAlignmentSpec::landfire_conus(res).unwrap());
        for bounds in scattered_bounds() {
            let aligned = aligner.align_bounds(&bounds).unwrap();
            let check = aligner.verify(&aligned.transform);
            assert!(check.aligned, "{:?} -> {:?} not aligned", bounds, aligned.transform);
            assert!(aligned.bounds.contains(&bounds, 1e-6), "{:?} not within {:?}", bounds, aligned.bounds);

            let covered_w = aligned.width as f64 * res;
            let covered_h = aligned.height as f64 * res;
            assert!(covered_w + 1e-6 >= aligned.bounds.width());
            assert!(covered_h + 1e-6 >= aligned.bounds.height());
        }
    }
}

#[test]
fn test_alignment_from_reference_raster() {
    let (ox, oy) = lattice::LANDFIRE_ORIGIN;
    let reference = GridGeometry::new(
        100,
        100,
        GeoTransform::from_origin(ox + 3000.0, oy - 6000.0, 30.0, 30.0),
        Crs::Epsg(5070),
    )
    .unwrap();
    let spec = GridAlignmentSpec::from_reference(&reference, None).unwrap();
    assert_eq!(spec.cell_size, 30.0);
    assert_eq!(spec.resolution, 30.0);

    let aligner = GridAligner::new(spec);
    let landfire = GridAligner::new(GridAlignmentSpec::landfire_conus(30.0).unwrap());
    let bounds = BoundingBox::new(ox + 1234.5, oy - 9876.5, ox + 4321.0, oy - 5000.2);
    let aligned = aligner.align_bounds(&bounds).unwrap();
    assert!(landfire.verify(&aligned.transform).aligned);
}

// ============================================================================
// Reprojection with alignment
// ============================================================================

#[test]
fn test_geographic_source_warps_onto_landfire_lattice() {
    let width = 40;
    let height = 30;
    let source_geom = GridGeometry::new(
        width,
        height,
        GeoTransform::from_origin(-105.5, 40.3, 0.0005, 0.0005),
        Crs::Epsg(4326),
    )
    .unwrap();
    let source = RasterGrid::new(source_geom.clone(), Some(0.0), PixelType::U8);
    let data = create_patch_grid(width, height, 5, &[1, 2, 5, 11]);

    let reprojector = Reprojector::new(ReprojectorConfig::default());
    let spec = GridAlignmentSpec::landfire_conus(30.0).unwrap();
    let target = reprojector
        .target_geometry(&source_geom, &Crs::Epsg(5070), None, Some(&spec))
        .unwrap();

    assert!(GridAligner::new(spec).verify(&target.transform).aligned);
    assert_eq!(target.crs, Crs::Epsg(5070));

    let projected = reprojector.transform_bounds(&source_geom, &Crs::Epsg(5070)).unwrap();
    assert!(target.bounds().contains(&projected, 1e-6));

    let out = reprojector
        .reproject(&source, &data, &target, CategoricalResampling::Mode)
        .unwrap();
    assert_eq!(out.len(), target.pixel_count());

    // Only source classes or the source nodata value may appear.
    assert!(out.iter().all(|v| [0, 1, 2, 5, 11].contains(v)));
    assert!(out.iter().any(|&v| v != 0));
}

#[test]
fn test_explicit_resolution_without_alignment() {
    let source_geom = GridGeometry::new(
        10,
        10,
        GeoTransform::from_origin(500_000.0, 4_500_000.0, 10.0, 10.0),
        Crs::Epsg(32613),
    )
    .unwrap();
    let reprojector = Reprojector::new(ReprojectorConfig::default());
    let target = reprojector
        .target_geometry(&source_geom, &Crs::Epsg(5070), Some(20.0), None)
        .unwrap();
    assert_eq!(target.transform.a, 20.0);
    assert!(target.width >= 5 && target.height >= 5);
}
