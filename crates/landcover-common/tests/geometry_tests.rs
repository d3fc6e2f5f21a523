//! Tests for grid geometry and block streaming.

use landcover_common::{
    block_windows, collect_blocks, BlockWindow, BoundingBox, Crs, GeoTransform, GridGeometry,
    MemoryRaster, PixelType, RasterGrid, RasterSource,
};
use test_utils::{assert_approx_eq, create_esri_scene, lattice};

fn landfire_geometry(width: usize, height: usize) -> GridGeometry {
    let (ox, oy) = lattice::LANDFIRE_ORIGIN;
    GridGeometry::new(
        width,
        height,
        GeoTransform::from_origin(ox, oy, lattice::LANDFIRE_CELL, lattice::LANDFIRE_CELL),
        Crs::Epsg(5070),
    )
    .unwrap()
}

// ============================================================================
// Geometry tests
// ============================================================================

#[test]
fn test_bounds_follow_cell_size() {
    let geom = landfire_geometry(100, 50);
    let bounds = geom.bounds();
    assert_approx_eq!(bounds.width(), 3000.0, 1e-9);
    assert_approx_eq!(bounds.height(), 1500.0, 1e-9);
    assert_eq!(bounds.min_x, lattice::LANDFIRE_ORIGIN.0);
    assert_eq!(bounds.max_y, lattice::LANDFIRE_ORIGIN.1);
}

#[test]
fn test_pixel_center_inside_bounds() {
    let geom = landfire_geometry(10, 10);
    let bounds = geom.bounds();
    let (x, y) = geom.transform.pixel_center(9, 9);
    assert!(bounds.contains_point(x, y));
    assert_approx_eq!(x, lattice::LANDFIRE_ORIGIN.0 + 285.0, 1e-9);
}

#[test]
fn test_replace_geometry_swaps_everything() {
    let mut grid = RasterGrid::new(landfire_geometry(4, 4), Some(-9999.0), PixelType::I16);
    let replacement = GridGeometry::new(
        8,
        2,
        GeoTransform::from_origin(0.0, 0.0, 10.0, 10.0),
        Crs::Epsg(3857),
    )
    .unwrap();
    grid.replace_geometry(replacement.clone());
    assert_eq!(grid.geometry, replacement);
    assert_eq!(grid.nodata, Some(-9999.0));
}

#[test]
fn test_bbox_contains_with_tolerance() {
    let outer = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let inner = BoundingBox::new(0.0, 0.0, 10.0000001, 10.0);
    assert!(!outer.contains(&inner, 0.0));
    assert!(outer.contains(&inner, 1e-6));
}

// ============================================================================
// Block streaming tests
// ============================================================================

#[test]
fn test_windows_are_full_width_strips() {
    let windows = block_windows(37, 10, 4, 37);
    assert_eq!(windows.len(), 3);
    assert!(windows.iter().all(|w| w.col_off == 0 && w.cols == 37));
    assert_eq!(windows[2], BlockWindow::new(8, 0, 2, 37));
}

#[test]
fn test_memory_raster_streams_identically() {
    let scene = create_esri_scene(13, 11);
    let grid = RasterGrid::new(landfire_geometry(13, 11), None, PixelType::U8);
    let mut raster = MemoryRaster::new(grid, scene.clone()).unwrap();

    let full = raster.read_window(&BlockWindow::full(13, 11)).unwrap();
    assert_eq!(full, scene);

    let streamed: Vec<i32> = collect_blocks(&mut raster, 13, 11, 3).unwrap();
    assert_eq!(streamed, scene);
}
