//! Structural GeoJSON geometry checks.
//!
//! Geometry values are stored as opaque JSON. The core only verifies that they
//! have the shape of a GeoJSON geometry object; it never interprets coordinates.

use serde_json::Value as Json;

/// Schema reference used by `json` properties holding geometries.
pub const GEOMETRY_SCHEMA_REF: &str = "#/components/schemas/geometry";

/// Checks that `geometry` is a structurally valid GeoJSON geometry.
///
/// Accepts `Point`, `MultiPoint`, `LineString`, `MultiLineString`, `Polygon`,
/// `MultiPolygon` and `GeometryCollection`. Positions carry two or three numbers.
///
/// # Errors
///
/// Returns a human-readable reason on the first structural violation.
pub fn validate_geometry(geometry: &Json) -> Result<(), String> {
    let obj = geometry
        .as_object()
        .ok_or_else(|| "geometry must be a JSON object".to_string())?;
    let kind = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| "geometry is missing a string 'type'".to_string())?;

    if kind == "GeometryCollection" {
        let members = obj
            .get("geometries")
            .and_then(Json::as_array)
            .ok_or_else(|| "GeometryCollection requires a 'geometries' array".to_string())?;
        return members.iter().try_for_each(validate_geometry);
    }

    let coords = obj
        .get("coordinates")
        .ok_or_else(|| format!("{kind} requires 'coordinates'"))?;

    match kind {
        "Point" => position(coords),
        "MultiPoint" => array_of(coords, 0, position),
        "LineString" => line_string(coords),
        "MultiLineString" => array_of(coords, 0, line_string),
        "Polygon" => polygon(coords),
        "MultiPolygon" => array_of(coords, 0, polygon),
        other => Err(format!("unsupported geometry type '{other}'")),
    }
}

fn position(coords: &Json) -> Result<(), String> {
    let arr = coords
        .as_array()
        .ok_or_else(|| "position must be an array".to_string())?;
    if !(2..=3).contains(&arr.len()) {
        return Err(format!("position must have 2 or 3 numbers, got {}", arr.len()));
    }
    if arr.iter().all(Json::is_number) {
        Ok(())
    } else {
        Err("position members must be numbers".to_string())
    }
}

fn line_string(coords: &Json) -> Result<(), String> {
    array_of(coords, 2, position)
}

fn linear_ring(coords: &Json) -> Result<(), String> {
    array_of(coords, 4, position)?;
    let arr = coords.as_array().map(Vec::as_slice).unwrap_or_default();
    if arr.first() == arr.last() {
        Ok(())
    } else {
        Err("polygon ring must be closed".to_string())
    }
}

fn polygon(coords: &Json) -> Result<(), String> {
    array_of(coords, 1, linear_ring)
}

fn array_of(
    coords: &Json,
    min_len: usize,
    member: fn(&Json) -> Result<(), String>,
) -> Result<(), String> {
    let arr = coords
        .as_array()
        .ok_or_else(|| "coordinates must be an array".to_string())?;
    if arr.len() < min_len {
        return Err(format!("expected at least {min_len} members, got {}", arr.len()));
    }
    arr.iter().try_for_each(member)
}
