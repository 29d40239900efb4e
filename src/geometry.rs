//! Polygon geometry decoded from the `.geo` column of exported basin tables.
//!
//! Coordinates follow GeoJSON order: `x` is longitude, `y` latitude, in degrees.

use crate::error::{AppError, Result};
use geo::{ChamberlainDuquetteArea, GeodesicArea, GeodesicLength, LineString, MultiPolygon, Polygon};
use std::f64::consts::PI;

/// Decode a GeoJSON Polygon or MultiPolygon. Foreign members such as
/// `geodesic` are ignored; every ring must be closed and within bounds.
pub fn decode_geometry(text: &str) -> Result<MultiPolygon<f64>> {
    let geometry: geojson::Geometry = serde_json::from_str(text)
        .map_err(|e| AppError::Parse(format!("Invalid geometry JSON: {}", e)))?;

    match geometry.value {
        geojson::Value::Polygon(rings) => Ok(MultiPolygon::new(vec![polygon_from_rings(rings)?])),
        geojson::Value::MultiPolygon(polygons) => {
            if polygons.is_empty() {
                return Err(AppError::Parse("MultiPolygon has no polygons".to_string()));
            }
            let polygons = polygons
                .into_iter()
                .map(polygon_from_rings)
                .collect::<Result<Vec<_>>>()?;
            Ok(MultiPolygon::new(polygons))
        }
        _ => Err(AppError::Parse(
            "Expected a Polygon or MultiPolygon geometry".to_string(),
        )),
    }
}

fn polygon_from_rings(rings: Vec<Vec<Vec<f64>>>) -> Result<Polygon<f64>> {
    let mut rings = rings
        .into_iter()
        .map(ring_from_positions)
        .collect::<Result<Vec<_>>>()?;

    if rings.is_empty() {
        return Err(AppError::Parse("Polygon has no rings".to_string()));
    }

    let exterior = rings.remove(0);
    Ok(Polygon::new(exterior, rings))
}

// geo closes open rings silently, so closure is checked here
fn ring_from_positions(positions: Vec<Vec<f64>>) -> Result<LineString<f64>> {
    if positions.len() < 4 {
        return Err(AppError::Parse(format!(
            "Linear ring needs at least 4 positions, got {}",
            positions.len()
        )));
    }

    let mut ring = Vec::with_capacity(positions.len());
    for position in positions {
        if position.len() < 2 {
            return Err(AppError::Parse(format!(
                "Position needs at least 2 coordinates, got {}",
                position.len()
            )));
        }
        let (lon, lat) = (position[0], position[1]);
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::Parse(format!(
                "Position ({}, {}) is outside longitude/latitude bounds",
                lon, lat
            )));
        }
        ring.push((lon, lat));
    }

    if ring.first() != ring.last() {
        return Err(AppError::Parse("Linear ring is not closed".to_string()));
    }

    Ok(LineString::from(ring))
}

/// Area in square metres on the WGS84 equatorial sphere, holes subtracted.
pub fn spherical_area(geometry: &MultiPolygon<f64>) -> f64 {
    geometry
        .0
        .iter()
        .map(|p| p.chamberlain_duquette_unsigned_area())
        .sum()
}

/// Length of all exterior rings in metres, on the WGS84 ellipsoid.
pub fn perimeter(geometry: &MultiPolygon<f64>) -> f64 {
    geometry
        .0
        .iter()
        .map(|p| p.exterior().geodesic_length())
        .sum()
}

/// Polsby-Popper compactness `4πA / P²`: 1 for a disc, towards 0 for elongated shapes.
pub fn compactness(geometry: &MultiPolygon<f64>) -> Option<f64> {
    let perimeter = perimeter(geometry);
    if perimeter <= 0.0 {
        return None;
    }
    let area: f64 = geometry
        .0
        .iter()
        .map(|p| p.geodesic_area_unsigned())
        .sum();
    Some(4.0 * PI * area / (perimeter * perimeter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    const SQUARE: &str =
        r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]],"geodesic":false}"#;

    #[test]
    fn test_decode_polygon() {
        let geometry = decode_geometry(SQUARE).unwrap();
        assert_eq!(geometry.0.len(), 1);
        let polygon = &geometry.0[0];
        assert_eq!(polygon.exterior().0.len(), 5);
        assert!(polygon.interiors().is_empty());
        assert!((polygon.unsigned_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_decode_multipolygon() {
        let text = r#"{"type":"MultiPolygon","coordinates":[
            [[[0,0],[1,0],[1,1],[0,1],[0,0]]],
            [[[2,0],[3,0],[3,1],[2,1],[2,0]]]
        ]}"#;
        let geometry = decode_geometry(text).unwrap();
        assert_eq!(geometry.0.len(), 2);

        let single = decode_geometry(SQUARE).unwrap();
        let ratio = spherical_area(&geometry) / spherical_area(&single);
        assert!((ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_hole_is_subtracted() {
        let text = r#"{"type":"Polygon","coordinates":[
            [[0,0],[2,0],[2,2],[0,2],[0,0]],
            [[0.5,0.5],[1.5,0.5],[1.5,1.5],[0.5,1.5],[0.5,0.5]]
        ]}"#;
        let geometry = decode_geometry(text).unwrap();
        let polygon = &geometry.0[0];
        let outer = Polygon::new(polygon.exterior().clone(), vec![]);
        let hole = Polygon::new(polygon.interiors()[0].clone(), vec![]);
        let expected =
            outer.chamberlain_duquette_unsigned_area() - hole.chamberlain_duquette_unsigned_area();
        assert!((spherical_area(&geometry) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_malformed_geometry() {
        assert!(decode_geometry("not json").is_err());
        assert!(decode_geometry(r#"{"type":"Point","coordinates":[0,0]}"#).is_err());
        // Open ring
        assert!(decode_geometry(r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1]]]}"#).is_err());
        // Latitude out of range
        assert!(decode_geometry(r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,95],[0,0]]]}"#).is_err());
    }

    #[test]
    fn test_perimeter_one_degree_on_equator() {
        let text = r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[0,0],[0,0]]]}"#;
        let geometry = decode_geometry(text).unwrap();
        // Out along the equator and back again
        let expected = 2.0 * 6_378_137.0 * 1f64.to_radians();
        assert!((perimeter(&geometry) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_compactness_of_small_square() {
        // A small square near the equator is close to the planar value π/4.
        let text = r#"{"type":"Polygon","coordinates":[[[0,0],[0.01,0],[0.01,0.01],[0,0.01],[0,0]]]}"#;
        let c = compactness(&decode_geometry(text).unwrap()).unwrap();
        assert!((c - PI / 4.0).abs() < 1e-3, "compactness was {}", c);
    }
}
