//! GeoJSON layers: region and market price markers, markets and roads.

use crate::domain::model::{MapSummary, MarketPoint, MarketSummary, RetailSummary, RoadSegment};
use crate::utils::error::{EtlError, Result};
use serde_json::{json, Value};

/// Mean Earth radius (IUGG) in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0088;

fn feature_collection(features: Vec<Value>) -> Value {
    json!({
        "type": "FeatureCollection",
        "crs": {
            "type": "name",
            "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" }
        },
        "features": features,
    })
}

/// Point features carrying each region's commodity list and marker styling.
pub fn regions_to_geojson(summary: &MapSummary) -> Value {
    let features = summary
        .regions
        .iter()
        .map(|region| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [region.longitude, region.latitude],
                },
                "properties": {
                    "region_name": region.region_name,
                    "region_id": region.region_id,
                    "year": summary.year,
                    "month": summary.month,
                    "commodity_count": region.commodity_count(),
                    "commodities": region.entries,
                    "color": region.color().as_str(),
                    "radius": region.radius(),
                    "tooltip": region.tooltip(),
                    "popup": region.popup_lines(),
                },
            })
        })
        .collect();
    feature_collection(features)
}

/// Green retail markers, one per market.
pub fn market_prices_to_geojson(summary: &RetailSummary) -> Value {
    let features = summary
        .markets
        .iter()
        .map(|market| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [market.longitude, market.latitude],
                },
                "properties": {
                    "market": market.market,
                    "market_id": market.market_id,
                    "year": summary.year,
                    "month": summary.month,
                    "commodity_count": market.commodity_count(),
                    "commodities": market.entries,
                    "color": MarketSummary::COLOR,
                    "radius": market.radius(),
                    "tooltip": market.tooltip(),
                    "popup": market.popup_lines(),
                },
            })
        })
        .collect();
    feature_collection(features)
}

pub fn markets_to_geojson(markets: &[MarketPoint]) -> Value {
    let features = markets
        .iter()
        .map(|m| {
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [m.longitude, m.latitude] },
                "properties": { "market": m.name },
            })
        })
        .collect();
    feature_collection(features)
}

pub fn roads_to_geojson(roads: &[RoadSegment]) -> Value {
    let features = roads
        .iter()
        .map(|road| {
            let geometry = match road.parts.as_slice() {
                [single] => json!({ "type": "LineString", "coordinates": points_json(single) }),
                parts => json!({
                    "type": "MultiLineString",
                    "coordinates": parts.iter().map(|p| points_json(p)).collect::<Vec<_>>(),
                }),
            };
            json!({
                "type": "Feature",
                "geometry": geometry,
                "properties": {
                    "name": road.name,
                    "road_type": road.road_type,
                    "length_km": road_length_km(road),
                },
            })
        })
        .collect();
    feature_collection(features)
}

fn points_json(points: &[(f64, f64)]) -> Value {
    Value::Array(points.iter().map(|(x, y)| json!([x, y])).collect())
}

fn features(data: &[u8], layer: &str) -> Result<Vec<Value>> {
    let root: Value = serde_json::from_slice(data)?;
    match root.get("features").and_then(Value::as_array) {
        Some(features) => Ok(features.clone()),
        None => Err(EtlError::parse(layer, 1, "expected a GeoJSON FeatureCollection")),
    }
}

fn position(value: &Value) -> Option<(f64, f64)> {
    let coords = value.as_array()?;
    Some((coords.first()?.as_f64()?, coords.get(1)?.as_f64()?))
}

fn line(value: &Value) -> Option<Vec<(f64, f64)>> {
    value.as_array()?.iter().map(position).collect()
}

fn property_string(feature: &Value, keys: &[&str]) -> Option<String> {
    let props = feature.get("properties")?;
    keys.iter().find_map(|key| match props.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    })
}

/// Reads market points; the name comes from the `market` (or `name`) property.
pub fn parse_markets(data: &[u8]) -> Result<Vec<MarketPoint>> {
    let mut markets = Vec::new();
    for (i, feature) in features(data, "markets layer")?.iter().enumerate() {
        let geometry = feature.get("geometry");
        let point = geometry
            .filter(|g| g.get("type").and_then(Value::as_str) == Some("Point"))
            .and_then(|g| g.get("coordinates"))
            .and_then(position);

        match point {
            Some((lon, lat)) => markets.push(MarketPoint {
                name: property_string(feature, &["market", "name"])
                    .unwrap_or_else(|| format!("Market {}", i + 1)),
                longitude: lon,
                latitude: lat,
            }),
            None => tracing::warn!("Skipping market feature {} without a point geometry", i),
        }
    }
    Ok(markets)
}

/// Reads LineString and MultiLineString road features.
pub fn parse_roads(data: &[u8]) -> Result<Vec<RoadSegment>> {
    let mut roads = Vec::new();
    for (i, feature) in features(data, "roads layer")?.iter().enumerate() {
        let Some(geometry) = feature.get("geometry") else {
            continue;
        };
        let coordinates = geometry.get("coordinates");
        let parts = match geometry.get("type").and_then(Value::as_str) {
            Some("LineString") => coordinates.and_then(line).map(|l| vec![l]),
            Some("MultiLineString") => coordinates
                .and_then(Value::as_array)
                .and_then(|parts| parts.iter().map(line).collect::<Option<Vec<_>>>()),
            _ => None,
        };

        match parts {
            Some(parts) => roads.push(RoadSegment {
                name: property_string(feature, &["name"]).unwrap_or_default(),
                road_type: property_string(feature, &["road_type", "highway", "GP_RTP"])
                    .unwrap_or_else(|| "unknown".to_string()),
                parts,
            }),
            None => tracing::warn!("Skipping road feature {} without a line geometry", i),
        }
    }
    Ok(roads)
}

/// Great-circle distance between two (lon, lat) points.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lon1, lat1) = (a.0.to_radians(), a.1.to_radians());
    let (lon2, lat2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

pub fn road_length_km(road: &RoadSegment) -> f64 {
    road.parts
        .iter()
        .flat_map(|part| part.windows(2))
        .map(|w| haversine_km(w[0], w[1]))
        .sum()
}

pub fn total_length_km(roads: &[RoadSegment]) -> f64 {
    roads.iter().map(road_length_km).sum()
}

pub fn sample_roads() -> Vec<RoadSegment> {
    vec![
        RoadSegment {
            name: "Main Road A".to_string(),
            road_type: "primary".to_string(),
            parts: vec![vec![(0.0, 0.0), (5.0, 5.0)]],
        },
        RoadSegment {
            name: "Feeder Road B".to_string(),
            road_type: "secondary".to_string(),
            parts: vec![vec![(3.0, 0.0), (3.0, 5.0)]],
        },
    ]
}

pub fn sample_markets() -> Vec<MarketPoint> {
    vec![
        MarketPoint {
            name: "Market 1".to_string(),
            longitude: 1.0,
            latitude: 1.0,
        },
        MarketPoint {
            name: "Market 2".to_string(),
            longitude: 4.0,
            latitude: 4.0,
        },
    ]
}
