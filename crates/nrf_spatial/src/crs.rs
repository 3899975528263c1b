//! Coordinate reference systems and the transforms between the ones the
//! worker accepts.
//!
//! WGS84 and British National Grid are linked through a seven-parameter
//! Helmert shift onto OSGB36 followed by the Airy 1830 Transverse Mercator
//! projection, which is the non-grid pipeline PROJ uses for EPSG:27700.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::fmt;
use std::str::FromStr;

use geo::{Coord, LineString, MultiPolygon, Polygon};

use crate::error::{Result, SpatialError};
use crate::feature::FeatureSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Crs(u32);

impl Crs {
    pub const WGS84: Crs = Crs(4326);
    pub const ETRS89: Crs = Crs(4258);
    pub const BRITISH_NATIONAL_GRID: Crs = Crs(27700);
    pub const WEB_MERCATOR: Crs = Crs(3857);

    pub const fn epsg(code: u32) -> Self {
        Crs(code)
    }

    pub fn code(&self) -> u32 {
        self.0
    }

    /// Degree-based systems. Area and distance are refused in these.
    pub fn is_geographic(&self) -> bool {
        matches!(self.0, 4326 | 4258)
    }

    /// Parse `EPSG:n`, `urn:ogc:def:crs:EPSG::n`, OGC CRS84 names and
    /// `http://www.opengis.net/def/crs/EPSG/0/n`.
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Crs::WGS84);
        }
        let code = if let Some(rest) = upper.strip_prefix("EPSG:") {
            rest
        } else if upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
            upper.rsplit(':').next().unwrap_or_default()
        } else if upper.contains("/EPSG/") {
            upper.rsplit('/').next().unwrap_or_default()
        } else {
            return Err(SpatialError::UnknownCrs(trimmed.to_string()));
        };
        code.parse::<u32>()
            .map(Crs)
            .map_err(|_| SpatialError::UnknownCrs(trimmed.to_string()))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl FromStr for Crs {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self> {
        Crs::parse(s)
    }
}

/// Reproject every feature into `target`.
///
/// Sets without a reference system are refused rather than assumed to be in
/// any particular one. Reprojection clears the recorded precision grid since
/// projected coordinates are no longer on it.
pub fn normalize_crs(set: &FeatureSet, target: Crs) -> Result<FeatureSet> {
    let source = set.crs.ok_or(SpatialError::MissingCrs)?;
    if source == target {
        return Ok(set.clone());
    }
    let transformer = Transformer::new(source, target)?;
    tracing::debug!(from = %source, to = %target, features = set.len(), "reprojecting");
    let mut out = FeatureSet::new(target);
    out.features = set
        .features
        .iter()
        .map(|feature| {
            let mut feature = feature.clone();
            feature.geometry = map_coords(&feature.geometry, |c| transformer.apply(c));
            feature
        })
        .collect();
    Ok(out)
}

/// Apply `f` to every coordinate of a multipolygon.
pub fn map_coords(geom: &MultiPolygon<f64>, f: impl Fn(Coord<f64>) -> Coord<f64>) -> MultiPolygon<f64> {
    let ring = |ls: &LineString<f64>| LineString::new(ls.coords().map(|c| f(*c)).collect());
    MultiPolygon::new(
        geom.iter()
            .map(|poly| {
                Polygon::new(
                    ring(poly.exterior()),
                    poly.interiors().iter().map(ring).collect(),
                )
            })
            .collect(),
    )
}

/// A validated source/target pair. Coordinates are `x = easting | longitude`,
/// `y = northing | latitude`.
#[derive(Debug, Clone, Copy)]
pub struct Transformer {
    from: Crs,
    to: Crs,
}

impl Transformer {
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        let supported = |crs: Crs| matches!(crs.0, 4326 | 4258 | 27700 | 3857);
        if from != to && !(supported(from) && supported(to)) {
            return Err(SpatialError::UnsupportedTransform { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn apply(&self, c: Coord<f64>) -> Coord<f64> {
        if self.from == self.to {
            return c;
        }
        let (lon, lat) = to_wgs84(self.from, c);
        from_wgs84(self.to, lon, lat)
    }
}

fn to_wgs84(crs: Crs, c: Coord<f64>) -> (f64, f64) {
    match crs.0 {
        3857 => web_mercator_inverse(c.x, c.y),
        27700 => {
            let (lat, lon) = tm_inverse(c.x, c.y);
            let (lat, lon) = helmert_datum(lat, lon, &AIRY_1830, &WGS84_ELLIPSOID, true);
            (lon.to_degrees(), lat.to_degrees())
        }
        _ => (c.x, c.y),
    }
}

fn from_wgs84(crs: Crs, lon: f64, lat: f64) -> Coord<f64> {
    match crs.0 {
        3857 => web_mercator_forward(lon, lat),
        27700 => {
            let (lat, lon) = helmert_datum(
                lat.to_radians(),
                lon.to_radians(),
                &WGS84_ELLIPSOID,
                &AIRY_1830,
                false,
            );
            let (e, n) = tm_forward(lat, lon);
            Coord { x: e, y: n }
        }
        _ => Coord { x: lon, y: lat },
    }
}

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

fn web_mercator_forward(lon: f64, lat: f64) -> Coord<f64> {
    let lat = lat.clamp(-85.051_128_779_806_6, 85.051_128_779_806_6);
    Coord {
        x: WEB_MERCATOR_RADIUS * lon.to_radians(),
        y: WEB_MERCATOR_RADIUS * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
    }
}

fn web_mercator_inverse(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / WEB_MERCATOR_RADIUS).to_degrees();
    let lat = (2.0 * (y / WEB_MERCATOR_RADIUS).exp().atan() - FRAC_PI_2).to_degrees();
    (lon, lat)
}

struct Ellipsoid {
    a: f64,
    b: f64,
}

impl Ellipsoid {
    fn e2(&self) -> f64 {
        (self.a * self.a - self.b * self.b) / (self.a * self.a)
    }
}

const AIRY_1830: Ellipsoid = Ellipsoid {
    a: 6_377_563.396,
    b: 6_356_256.909,
};

const WGS84_ELLIPSOID: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    b: 6_356_752.314_245,
};

/// WGS84 -> OSGB36, position-vector convention.
const HELMERT_TX: f64 = -446.448;
const HELMERT_TY: f64 = 125.157;
const HELMERT_TZ: f64 = -542.060;
const HELMERT_SCALE_PPM: f64 = 20.4894;
const HELMERT_RX_ARCSEC: f64 = -0.1502;
const HELMERT_RY_ARCSEC: f64 = -0.2470;
const HELMERT_RZ_ARCSEC: f64 = -0.8421;

/// Shift geodetic coordinates (radians) between datums through geocentric
/// cartesian space. `inverse` applies the exact inverse of the WGS84 ->
/// OSGB36 shift.
fn helmert_datum(lat: f64, lon: f64, from: &Ellipsoid, to: &Ellipsoid, inverse: bool) -> (f64, f64) {
    let [x, y, z] = geodetic_to_cartesian(lat, lon, from);
    let m = helmert_matrix();
    let t = [HELMERT_TX, HELMERT_TY, HELMERT_TZ];
    let out = if inverse {
        match invert3(&m) {
            Some(inv) => mul3(&inv, [x - t[0], y - t[1], z - t[2]]),
            None => [x, y, z],
        }
    } else {
        let r = mul3(&m, [x, y, z]);
        [r[0] + t[0], r[1] + t[1], r[2] + t[2]]
    };
    cartesian_to_geodetic(out, to)
}

fn helmert_matrix() -> [[f64; 3]; 3] {
    let arcsec = PI / (180.0 * 3600.0);
    let s = 1.0 + HELMERT_SCALE_PPM * 1e-6;
    let (rx, ry, rz) = (
        HELMERT_RX_ARCSEC * arcsec,
        HELMERT_RY_ARCSEC * arcsec,
        HELMERT_RZ_ARCSEC * arcsec,
    );
    [[s, -rz, ry], [rz, s, -rx], [-ry, rx, s]]
}

fn mul3(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

fn invert3(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let cof = |r0: usize, r1: usize, c0: usize, c1: usize| m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0];
    let det = m[0][0] * cof(1, 2, 1, 2) - m[0][1] * cof(1, 2, 0, 2) + m[0][2] * cof(1, 2, 0, 1);
    if det.abs() < f64::EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [
            cof(1, 2, 1, 2) * inv_det,
            -cof(0, 2, 1, 2) * inv_det,
            cof(0, 1, 1, 2) * inv_det,
        ],
        [
            -cof(1, 2, 0, 2) * inv_det,
            cof(0, 2, 0, 2) * inv_det,
            -cof(0, 1, 0, 2) * inv_det,
        ],
        [
            cof(1, 2, 0, 1) * inv_det,
            -cof(0, 2, 0, 1) * inv_det,
            cof(0, 1, 0, 1) * inv_det,
        ],
    ])
}

fn geodetic_to_cartesian(lat: f64, lon: f64, ell: &Ellipsoid) -> [f64; 3] {
    let e2 = ell.e2();
    let nu = ell.a / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    [
        nu * lat.cos() * lon.cos(),
        nu * lat.cos() * lon.sin(),
        (1.0 - e2) * nu * lat.sin(),
    ]
}

fn cartesian_to_geodetic([x, y, z]: [f64; 3], ell: &Ellipsoid) -> (f64, f64) {
    let e2 = ell.e2();
    let p = (x * x + y * y).sqrt();
    let mut lat = z.atan2(p * (1.0 - e2));
    for _ in 0..16 {
        let nu = ell.a / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        let next = (z + e2 * nu * lat.sin()).atan2(p);
        let done = (next - lat).abs() < 1e-14;
        lat = next;
        if done {
            break;
        }
    }
    (lat, y.atan2(x))
}

/// National Grid projection constants.
const F0: f64 = 0.999_601_271_7;
const LAT0_DEG: f64 = 49.0;
const LON0_DEG: f64 = -2.0;
const E0: f64 = 400_000.0;
const N0: f64 = -100_000.0;

fn meridional_arc(lat: f64) -> f64 {
    let (a, b) = (AIRY_1830.a, AIRY_1830.b);
    let n = (a - b) / (a + b);
    let (n2, n3) = (n * n, n * n * n);
    let lat0 = LAT0_DEG.to_radians();
    let (d, s) = (lat - lat0, lat + lat0);
    b * F0
        * ((1.0 + n + 1.25 * n2 + 1.25 * n3) * d
            - (3.0 * n + 3.0 * n2 + 21.0 / 8.0 * n3) * d.sin() * s.cos()
            + (15.0 / 8.0 * n2 + 15.0 / 8.0 * n3) * (2.0 * d).sin() * (2.0 * s).cos()
            - 35.0 / 24.0 * n3 * (3.0 * d).sin() * (3.0 * s).cos())
}

fn radii(lat: f64) -> (f64, f64, f64) {
    let a = AIRY_1830.a;
    let e2 = AIRY_1830.e2();
    let k = 1.0 - e2 * lat.sin().powi(2);
    let nu = a * F0 / k.sqrt();
    let rho = a * F0 * (1.0 - e2) / k.powf(1.5);
    (nu, rho, nu / rho - 1.0)
}

/// OSGB36 latitude/longitude (radians) to easting/northing.
fn tm_forward(lat: f64, lon: f64) -> (f64, f64) {
    let (nu, rho, eta2) = radii(lat);
    let m = meridional_arc(lat);
    let (sin, cos, tan) = (lat.sin(), lat.cos(), lat.tan());
    let tan2 = tan * tan;
    let tan4 = tan2 * tan2;

    let i = m + N0;
    let ii = nu / 2.0 * sin * cos;
    let iii = nu / 24.0 * sin * cos.powi(3) * (5.0 - tan2 + 9.0 * eta2);
    let iiia = nu / 720.0 * sin * cos.powi(5) * (61.0 - 58.0 * tan2 + tan4);
    let iv = nu * cos;
    let v = nu / 6.0 * cos.powi(3) * (nu / rho - tan2);
    let vi = nu / 120.0
        * cos.powi(5)
        * (5.0 - 18.0 * tan2 + tan4 + 14.0 * eta2 - 58.0 * tan2 * eta2);

    let dl = lon - LON0_DEG.to_radians();
    let northing = i + ii * dl.powi(2) + iii * dl.powi(4) + iiia * dl.powi(6);
    let easting = E0 + iv * dl + v * dl.powi(3) + vi * dl.powi(5);
    (easting, northing)
}

/// Easting/northing to OSGB36 latitude/longitude (radians).
fn tm_inverse(easting: f64, northing: f64) -> (f64, f64) {
    let a = AIRY_1830.a;
    let lat0 = LAT0_DEG.to_radians();
    let mut lat = (northing - N0) / (a * F0) + lat0;
    let mut m = meridional_arc(lat);
    for _ in 0..32 {
        let residual = northing - N0 - m;
        if residual.abs() < 1e-5 {
            break;
        }
        lat += residual / (a * F0);
        m = meridional_arc(lat);
    }

    let (nu, rho, eta2) = radii(lat);
    let tan = lat.tan();
    let (tan2, tan4, tan6) = (tan.powi(2), tan.powi(4), tan.powi(6));
    let sec = 1.0 / lat.cos();

    let vii = tan / (2.0 * rho * nu);
    let viii = tan / (24.0 * rho * nu.powi(3)) * (5.0 + 3.0 * tan2 + eta2 - 9.0 * tan2 * eta2);
    let ix = tan / (720.0 * rho * nu.powi(5)) * (61.0 + 90.0 * tan2 + 45.0 * tan4);
    let x = sec / nu;
    let xi = sec / (6.0 * nu.powi(3)) * (nu / rho + 2.0 * tan2);
    let xii = sec / (120.0 * nu.powi(5)) * (5.0 + 28.0 * tan2 + 24.0 * tan4);
    let xiia = sec / (5040.0 * nu.powi(7)) * (61.0 + 662.0 * tan2 + 1320.0 * tan4 + 720.0 * tan6);

    let de = easting - E0;
    let lat_out = lat - vii * de.powi(2) + viii * de.powi(4) - ix * de.powi(6);
    let lon_out = LON0_DEG.to_radians() + x * de - xi * de.powi(3) + xii * de.powi(5)
        - xiia * de.powi(7);
    (lat_out, lon_out)
}
