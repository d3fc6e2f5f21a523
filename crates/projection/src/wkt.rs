//! A small WKT1 reader that turns common projected and geographic
//! definitions into PROJ.4 strings.
//!
//! Only the projections that show up on land-cover products are handled:
//! Albers, Transverse Mercator, Lambert Conformal Conic, Lambert Azimuthal
//! Equal Area and (pseudo) Mercator. Anything else is reported as unsupported
//! so the caller can fall back.

use crate::error::{ProjectionError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Str(String),
    Num(f64),
    Ident(String),
    Node(Node),
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    keyword: String,
    args: Vec<Arg>,
}

impl Node {
    fn child(&self, keyword: &str) -> Option<&Node> {
        self.args.iter().find_map(|a| match a {
            Arg::Node(n) if n.keyword.eq_ignore_ascii_case(keyword) => Some(n),
            _ => None,
        })
    }

    fn children<'a>(&'a self, keyword: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.args.iter().filter_map(move |a| match a {
            Arg::Node(n) if n.keyword.eq_ignore_ascii_case(keyword) => Some(n),
            _ => None,
        })
    }

    fn name(&self) -> Option<&str> {
        match self.args.first() {
            Some(Arg::Str(s)) => Some(s),
            _ => None,
        }
    }

    fn number(&self, index: usize) -> Option<f64> {
        match self.args.get(index) {
            Some(Arg::Num(v)) => Some(*v),
            _ => None,
        }
    }

    fn numbers(&self) -> Vec<f64> {
        self.args
            .iter()
            .filter_map(|a| match a {
                Arg::Num(v) => Some(*v),
                _ => None,
            })
            .collect()
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn word(&mut self) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '+') {
                out.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        out
    }

    fn node(&mut self) -> Result<Node> {
        self.skip_ws();
        let keyword = self.word();
        if keyword.is_empty() {
            return Err(malformed("expected keyword"));
        }
        self.skip_ws();
        match self.chars.next() {
            Some('[') | Some('(') => {}
            _ => return Err(malformed(format!("expected '[' after {}", keyword))),
        }

        let mut args = Vec::new();
        loop {
            self.skip_ws();
            match self.chars.peek().copied() {
                Some(']') | Some(')') => {
                    self.chars.next();
                    break;
                }
                Some(',') => {
                    self.chars.next();
                }
                Some('"') => {
                    self.chars.next();
                    let mut s = String::new();
                    loop {
                        match self.chars.next() {
                            Some('"') if self.chars.peek() == Some(&'"') => {
                                self.chars.next();
                                s.push('"');
                            }
                            Some('"') => break,
                            Some(c) => s.push(c),
                            None => return Err(malformed("unterminated string")),
                        }
                    }
                    args.push(Arg::Str(s));
                }
                Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                    let w = self.word();
                    let v = w
                        .parse()
                        .map_err(|_| malformed(format!("bad number '{}'", w)))?;
                    args.push(Arg::Num(v));
                }
                Some(c) if c.is_ascii_alphabetic() => {
                    let save = self.chars.clone();
                    let w = self.word();
                    self.skip_ws();
                    if matches!(self.chars.peek(), Some('[') | Some('(')) {
                        self.chars = save;
                        args.push(Arg::Node(self.node()?));
                    } else {
                        args.push(Arg::Ident(w));
                    }
                }
                Some(c) => return Err(malformed(format!("unexpected '{}'", c))),
                None => return Err(malformed("unexpected end of text")),
            }
        }
        Ok(Node { keyword, args })
    }
}

fn malformed(reason: impl Into<String>) -> ProjectionError {
    ProjectionError::InvalidDefinition {
        crs: "WKT".to_string(),
        reason: reason.into(),
    }
}

fn unsupported(reason: impl Into<String>) -> ProjectionError {
    ProjectionError::crs_resolution("WKT", reason)
}

/// Convert WKT1 text into a PROJ.4 definition string.
pub fn wkt_to_proj(wkt: &str) -> Result<String> {
    let root = Parser::new(wkt).node()?;
    match root.keyword.to_uppercase().as_str() {
        "PROJCS" => projected(&root),
        "GEOGCS" => {
            let mut parts = vec!["+proj=longlat".to_string()];
            parts.extend(datum_params(&root));
            parts.push("+no_defs".to_string());
            Ok(parts.join(" "))
        }
        other => Err(unsupported(format!("unsupported WKT root {}", other))),
    }
}

fn projected(root: &Node) -> Result<String> {
    let method = root
        .child("PROJECTION")
        .and_then(Node::name)
        .ok_or_else(|| malformed("PROJCS without PROJECTION"))?;

    let mut parts = Vec::new();
    let normalized = method.to_lowercase().replace(' ', "_");
    let pseudo_mercator = matches!(
        normalized.as_str(),
        "popular_visualisation_pseudo_mercator" | "mercator_auxiliary_sphere"
    );
    let proj = match normalized.as_str() {
        "albers_conic_equal_area" | "albers" => "aea",
        "transverse_mercator" => "tmerc",
        "lambert_conformal_conic_2sp" | "lambert_conformal_conic" | "lambert_conformal_conic_1sp" => "lcc",
        "lambert_azimuthal_equal_area" => "laea",
        "mercator_1sp" | "mercator" => "merc",
        _ if pseudo_mercator => "merc",
        _ => return Err(unsupported(format!("unsupported projection method {}", method))),
    };
    parts.push(format!("+proj={}", proj));

    for param in root.children("PARAMETER") {
        let (Some(name), Some(value)) = (param.name(), param.number(1)) else {
            continue;
        };
        let key = match name.to_lowercase().as_str() {
            "latitude_of_center" | "latitude_of_origin" => "lat_0",
            "longitude_of_center" | "central_meridian" => "lon_0",
            "standard_parallel_1" => "lat_1",
            "standard_parallel_2" => "lat_2",
            "false_easting" => "x_0",
            "false_northing" => "y_0",
            "scale_factor" => "k_0",
            _ => continue,
        };
        parts.push(format!("+{}={}", key, value));
    }

    if pseudo_mercator {
        parts.push("+a=6378137 +b=6378137".to_string());
    } else if let Some(geog) = root.child("GEOGCS") {
        parts.extend(datum_params(geog));
    }

    // The linear unit is the last UNIT directly under PROJCS.
    if let Some(factor) = root.children("UNIT").last().and_then(|u| u.number(1)) {
        if (factor - 1.0).abs() > 1e-12 {
            parts.push(format!("+to_meter={}", factor));
        }
    }
    parts.push("+units=m +no_defs".to_string());
    Ok(parts.join(" "))
}

fn datum_params(geog: &Node) -> Vec<String> {
    let mut parts = Vec::new();
    let Some(datum) = geog.child("DATUM") else {
        return parts;
    };

    if let Some(spheroid) = datum.child("SPHEROID") {
        let known = spheroid.name().and_then(|n| {
            match n.to_uppercase().replace([' ', '_'], "").as_str() {
                "GRS1980" => Some("GRS80"),
                "WGS84" | "WGS1984" => Some("WGS84"),
                "CLARKE1866" => Some("clrk66"),
                _ => None,
            }
        });
        match (known, spheroid.number(1), spheroid.number(2)) {
            (Some(ellps), _, _) => parts.push(format!("+ellps={}", ellps)),
            (None, Some(a), Some(rf)) => parts.push(format!("+a={} +rf={}", a, rf)),
            _ => {}
        }
    }

    if let Some(towgs) = datum.child("TOWGS84") {
        let values: Vec<String> = towgs.numbers().iter().map(|v| v.to_string()).collect();
        if !values.is_empty() {
            parts.push(format!("+towgs84={}", values.join(",")));
        }
    }
    parts
}
