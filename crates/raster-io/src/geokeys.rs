//! GeoTIFF georeferencing tags and the GeoKey directory.
//!
//! Only the keys needed to round-trip a north-up grid and its CRS are
//! understood: model type, raster type, citation, and the geographic or
//! projected CS code. A user-defined projected CS (32767) carries its WKT
//! in the citation.

use landcover_common::{Crs, GeoTransform};

pub const MODEL_PIXEL_SCALE: u16 = 33550;
pub const MODEL_TIEPOINT: u16 = 33922;
pub const MODEL_TRANSFORMATION: u16 = 34264;
pub const GEO_KEY_DIRECTORY: u16 = 34735;
pub const GEO_ASCII_PARAMS: u16 = 34737;
pub const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GT_CITATION: u16 = 1026;
const GEOGRAPHIC_TYPE: u16 = 2048;
const GEOG_CITATION: u16 = 2049;
const PROJECTED_CS_TYPE: u16 = 3072;
const PCS_CITATION: u16 = 3073;

const MODEL_PROJECTED: u16 = 1;
const MODEL_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;

/// Encoded GeoKey directory plus its ASCII parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoKeys {
    pub directory: Vec<u16>,
    pub ascii: Option<String>,
}

struct Entry {
    key: u16,
    location: u16,
    count: u16,
    value: u16,
}

/// Encode the keys describing `crs`.
pub fn encode(crs: &Crs) -> GeoKeys {
    let mut entries = Vec::new();
    let mut ascii = String::new();

    let geographic = crs.is_geographic();
    let model = if geographic {
        MODEL_GEOGRAPHIC
    } else {
        MODEL_PROJECTED
    };
    entries.push(short(GT_MODEL_TYPE, model));
    entries.push(short(GT_RASTER_TYPE, RASTER_PIXEL_IS_AREA));

    let code = crs
        .epsg()
        .and_then(|c| u16::try_from(c).ok())
        .filter(|_| matches!(crs, Crs::Epsg(_)));

    match code {
        Some(code) => {
            let key = if geographic {
                GEOGRAPHIC_TYPE
            } else {
                PROJECTED_CS_TYPE
            };
            entries.push(short(key, code));
        }
        None => {
            let text = match crs {
                Crs::Wkt(wkt) => wkt.replace('|', " "),
                Crs::Epsg(code) => format!("EPSG:{}", code),
            };
            let key = if geographic {
                GEOGRAPHIC_TYPE
            } else {
                PROJECTED_CS_TYPE
            };
            entries.push(Entry {
                key: GT_CITATION,
                location: GEO_ASCII_PARAMS,
                count: (text.len() + 1) as u16,
                value: 0,
            });
            entries.push(short(key, USER_DEFINED));
            ascii.push_str(&text);
            ascii.push('|');
        }
    }

    entries.sort_by_key(|e| e.key);
    let mut directory = vec![1, 1, 0, entries.len() as u16];
    for e in entries {
        directory.extend([e.key, e.location, e.count, e.value]);
    }

    GeoKeys {
        directory,
        ascii: (!ascii.is_empty()).then_some(ascii),
    }
}

fn short(key: u16, value: u16) -> Entry {
    Entry {
        key,
        location: 0,
        count: 1,
        value,
    }
}

/// Recover a CRS from a GeoKey directory.
///
/// EPSG codes are preferred. A user-defined system is read from whichever
/// citation parses as a CRS.
pub fn decode(directory: &[u16], ascii: Option<&str>) -> Option<Crs> {
    if directory.len() < 4 {
        return None;
    }
    let count = directory[3] as usize;
    let mut shorts = Vec::new();
    let mut citations = Vec::new();

    for entry in directory[4..].chunks_exact(4).take(count) {
        let (key, location, n, value) = (entry[0], entry[1], entry[2] as usize, entry[3] as usize);
        match location {
            0 => shorts.push((key, entry[3])),
            GEO_ASCII_PARAMS => {
                if let Some(text) = ascii.and_then(|a| a.get(value..value + n)) {
                    citations.push((key, text.trim_end_matches(['|', '\0']).to_string()));
                }
            }
            _ => {}
        }
    }

    let code_of = |k: u16| {
        shorts
            .iter()
            .find(|(key, _)| *key == k)
            .map(|(_, v)| *v)
            .filter(|v| *v != 0 && *v != USER_DEFINED)
    };
    if let Some(code) = code_of(PROJECTED_CS_TYPE).or_else(|| code_of(GEOGRAPHIC_TYPE)) {
        return Some(Crs::Epsg(code as u32));
    }

    [PCS_CITATION, GT_CITATION, GEOG_CITATION]
        .iter()
        .filter_map(|k| citations.iter().find(|(key, _)| key == k))
        .find_map(|(_, text)| Crs::from_user_string(text).ok())
}

/// Pixel scale and tiepoint for a north-up transform.
pub fn model_tags(transform: &GeoTransform) -> ([f64; 3], [f64; 6]) {
    (
        [transform.a, -transform.e, 0.0],
        [0.0, 0.0, 0.0, transform.c, transform.f, 0.0],
    )
}

/// Rebuild the transform from whichever model tags are present.
pub fn transform_from_tags(
    scale: Option<&[f64]>,
    tiepoint: Option<&[f64]>,
    matrix: Option<&[f64]>,
) -> Option<GeoTransform> {
    if let (Some(s), Some(t)) = (scale, tiepoint) {
        if s.len() >= 2 && t.len() >= 6 {
            let (sx, sy) = (s[0], s[1]);
            let origin_x = t[3] - t[0] * sx;
            let origin_y = t[4] + t[1] * sy;
            return Some(GeoTransform::from_origin(origin_x, origin_y, sx, sy));
        }
    }
    matrix
        .filter(|m| m.len() >= 8)
        .map(|m| GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]]))
}
