//! Loading of the region farm-gate and market retail price tables.

use crate::domain::model::{LoadReport, PriceRecord, RetailPriceRecord};
use crate::utils::error::{EtlError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// Header names of the price table. Defaults follow the merged regional workbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub year: String,
    pub month: String,
    pub commodity: String,
    pub region_name: String,
    pub region_id: String,
    pub latitude: String,
    pub longitude: String,
    pub price: String,
    pub unit: String,
    /// Optional date column used when year or month is missing.
    pub date: Option<String>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            year: "Year".to_string(),
            month: "Month".to_string(),
            commodity: "Commodity".to_string(),
            region_name: "Régions Name".to_string(),
            region_id: "Régions - RegionId".to_string(),
            latitude: "Régions - Latitude".to_string(),
            longitude: "Régions - Longitude".to_string(),
            price: "Price".to_string(),
            unit: "Unit".to_string(),
            date: Some("date".to_string()),
        }
    }
}

struct ColumnIndex {
    year: usize,
    month: usize,
    commodity: usize,
    region_name: usize,
    region_id: usize,
    latitude: usize,
    longitude: usize,
    price: usize,
    unit: usize,
    date: Option<usize>,
}

impl ColumnMap {
    fn required(&self) -> [&str; 9] {
        [
            &self.year,
            &self.month,
            &self.commodity,
            &self.region_name,
            &self.region_id,
            &self.latitude,
            &self.longitude,
            &self.price,
            &self.unit,
        ]
    }

    fn resolve(&self, headers: &csv::StringRecord) -> Result<ColumnIndex> {
        let names = header_names(headers);
        check_required(&names, &self.required())?;

        // 上面已確認欄位存在
        let idx = |name: &str| position(&names, name).unwrap_or_default();
        Ok(ColumnIndex {
            year: idx(self.year.as_str()),
            month: idx(self.month.as_str()),
            commodity: idx(self.commodity.as_str()),
            region_name: idx(self.region_name.as_str()),
            region_id: idx(self.region_id.as_str()),
            latitude: idx(self.latitude.as_str()),
            longitude: idx(self.longitude.as_str()),
            price: idx(self.price.as_str()),
            unit: idx(self.unit.as_str()),
            date: self.date.as_deref().and_then(|name| position(&names, name)),
        })
    }
}

/// Header names of the market retail table. Defaults follow the WFP market export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetailColumnMap {
    pub year: String,
    pub month: String,
    pub commodity: String,
    pub market: String,
    pub market_id: String,
    pub latitude: String,
    pub longitude: String,
    pub price: String,
    pub unit: String,
    pub date: Option<String>,
}

impl Default for RetailColumnMap {
    fn default() -> Self {
        Self {
            year: "year".to_string(),
            month: "month".to_string(),
            commodity: "commodity_retail".to_string(),
            market: "market".to_string(),
            market_id: "market_id".to_string(),
            latitude: "latitude".to_string(),
            longitude: "longitude".to_string(),
            price: "price_retail".to_string(),
            unit: "unit2_retail".to_string(),
            date: Some("date".to_string()),
        }
    }
}

struct RetailColumnIndex {
    year: usize,
    month: usize,
    commodity: usize,
    market: usize,
    market_id: usize,
    latitude: usize,
    longitude: usize,
    price: usize,
    unit: usize,
    date: Option<usize>,
}

impl RetailColumnMap {
    fn required(&self) -> [&str; 9] {
        [
            &self.year,
            &self.month,
            &self.commodity,
            &self.market,
            &self.market_id,
            &self.latitude,
            &self.longitude,
            &self.price,
            &self.unit,
        ]
    }

    fn resolve(&self, headers: &csv::StringRecord) -> Result<RetailColumnIndex> {
        let names = header_names(headers);
        check_required(&names, &self.required())?;

        let idx = |name: &str| position(&names, name).unwrap_or_default();
        Ok(RetailColumnIndex {
            year: idx(self.year.as_str()),
            month: idx(self.month.as_str()),
            commodity: idx(self.commodity.as_str()),
            market: idx(self.market.as_str()),
            market_id: idx(self.market_id.as_str()),
            latitude: idx(self.latitude.as_str()),
            longitude: idx(self.longitude.as_str()),
            price: idx(self.price.as_str()),
            unit: idx(self.unit.as_str()),
            date: self.date.as_deref().and_then(|name| position(&names, name)),
        })
    }
}

fn header_names(headers: &csv::StringRecord) -> Vec<&str> {
    headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim())
        .collect()
}

/// Every absent required column is reported at once.
fn check_required(names: &[&str], required: &[&str]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|&&name| position(names, name).is_none())
        .map(|name| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EtlError::MissingColumnsError { columns: missing })
    }
}

fn position(names: &[&str], name: &str) -> Option<usize> {
    names.iter().position(|h| *h == name)
}

/// Trims, collapses inner whitespace and title-cases a commodity name.
pub fn normalize_commodity(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let mut prev_alpha = false;
    for ch in collapsed.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

fn parse_number(raw: &str) -> Option<f64> {
    let value = raw.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

fn parse_whole(raw: &str) -> Option<i64> {
    let value = parse_number(raw)?;
    (value.fract() == 0.0).then_some(value as i64)
}

fn parse_month(raw: &str) -> Option<u32> {
    parse_whole(raw)
        .filter(|m| (1..=12).contains(m))
        .map(|m| m as u32)
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and RFC 3339.
fn parse_date(raw: &str) -> Option<(i32, u32)> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some((date.year(), date.month()));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some((dt.year(), dt.month()));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| (dt.year(), dt.month()))
}

/// Year and month of a row; the date column fills whichever is missing.
fn row_period(year: &str, month: &str, date: Option<&str>) -> (Option<i32>, Option<u32>) {
    let mut year = parse_whole(year).and_then(|y| i32::try_from(y).ok());
    let mut month = parse_month(month);
    if year.is_none() || month.is_none() {
        if let Some((y, m)) = date.and_then(parse_date) {
            year = year.or(Some(y));
            month = month.or(Some(m));
        }
    }
    (year, month)
}

fn unit_or_unknown(raw: &str) -> String {
    match raw {
        "" => "Unknown".to_string(),
        u => u.to_string(),
    }
}

fn csv_reader(data: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new().flexible(true).from_reader(data)
}

/// Counts bad rows and logs each non-zero count under `table`.
fn inspect<T>(
    table: &str,
    records: &[T],
    coordinates: impl Fn(&T) -> Option<(f64, f64)>,
    price: impl Fn(&T) -> Option<f64>,
) -> LoadReport {
    let report = LoadReport {
        rows: records.len(),
        invalid_coordinates: records.iter().filter(|r| coordinates(r).is_none()).count(),
        invalid_prices: records.iter().filter(|r| price(r).is_none()).count(),
        duplicates_merged: 0,
    };
    if report.invalid_coordinates > 0 {
        tracing::warn!(
            "Found {} {} rows with invalid coordinates",
            report.invalid_coordinates,
            table
        );
    }
    if report.invalid_prices > 0 {
        tracing::warn!(
            "Found {} {} rows with invalid or missing prices",
            report.invalid_prices,
            table
        );
    }
    report
}

/// Parses the region price table, coercing bad numbers to missing and merging duplicates.
pub fn load_price_table(data: &[u8], columns: &ColumnMap) -> Result<(Vec<PriceRecord>, LoadReport)> {
    let mut reader = csv_reader(data);
    let index = columns.resolve(reader.headers()?)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let field = |i: usize| row.get(i).unwrap_or("").trim();
        let (year, month) = row_period(field(index.year), field(index.month), index.date.map(field));

        records.push(PriceRecord {
            year,
            month,
            commodity: normalize_commodity(field(index.commodity)),
            region_name: field(index.region_name).to_string(),
            region_id: field(index.region_id).to_string(),
            latitude: parse_number(field(index.latitude)),
            longitude: parse_number(field(index.longitude)),
            price: parse_number(field(index.price)),
            unit: unit_or_unknown(field(index.unit)),
        });
    }

    let mut report = inspect("price", &records, PriceRecord::coordinates, |r| r.price);
    let before = records.len();
    let records = merge_duplicates(records);
    report.duplicates_merged = before - records.len();
    if report.duplicates_merged > 0 {
        tracing::warn!("Merged {} duplicate entries", report.duplicates_merged);
    }

    Ok((records, report))
}

/// Parses the market retail table the same way, deduplicating on (market id, year, month, commodity).
pub fn load_retail_table(
    data: &[u8],
    columns: &RetailColumnMap,
) -> Result<(Vec<RetailPriceRecord>, LoadReport)> {
    let mut reader = csv_reader(data);
    let index = columns.resolve(reader.headers()?)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let field = |i: usize| row.get(i).unwrap_or("").trim();
        let (year, month) = row_period(field(index.year), field(index.month), index.date.map(field));

        records.push(RetailPriceRecord {
            year,
            month,
            commodity: normalize_commodity(field(index.commodity)),
            market: field(index.market).to_string(),
            market_id: field(index.market_id).to_string(),
            latitude: parse_number(field(index.latitude)),
            longitude: parse_number(field(index.longitude)),
            price: parse_number(field(index.price)),
            unit: unit_or_unknown(field(index.unit)),
        });
    }

    let mut report = inspect("retail", &records, RetailPriceRecord::coordinates, |r| r.price);
    let before = records.len();
    let records = merge_mean(
        records,
        |r| (r.market_id.clone(), r.year, r.month, r.commodity.clone()),
        |r| &mut r.price,
    );
    report.duplicates_merged = before - records.len();
    if report.duplicates_merged > 0 {
        tracing::warn!("Merged {} duplicate retail entries", report.duplicates_merged);
    }

    Ok((records, report))
}

/// Collapses rows sharing (region id, year, month, commodity); the price becomes the mean of present prices.
pub fn merge_duplicates(records: Vec<PriceRecord>) -> Vec<PriceRecord> {
    merge_mean(
        records,
        |r| (r.region_id.clone(), r.year, r.month, r.commodity.clone()),
        |r| &mut r.price,
    )
}

/// Keeps the first row of each key in input order, replacing its price with the group mean.
fn merge_mean<T, K>(
    records: Vec<T>,
    key_of: impl Fn(&T) -> K,
    price_of: impl Fn(&mut T) -> &mut Option<f64>,
) -> Vec<T>
where
    K: Hash + Eq + Clone,
{
    let mut order: Vec<K> = Vec::new();
    let mut groups: HashMap<K, (T, f64, usize)> = HashMap::new();

    for mut record in records {
        let key = key_of(&record);
        let price = *price_of(&mut record);
        let entry = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            (record, 0.0, 0)
        });
        if let Some(p) = price {
            entry.1 += p;
            entry.2 += 1;
        }
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|(mut record, sum, count)| {
            *price_of(&mut record) = (count > 0).then(|| sum / count as f64);
            record
        })
        .collect()
}
