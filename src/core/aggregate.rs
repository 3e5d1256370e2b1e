use crate::domain::model::{
    CommodityEntry, DetailRow, MapSummary, MarketSummary, PriceRecord, RegionSummary, RetailPriceRecord,
    RetailSummary,
};
use std::collections::BTreeSet;

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub fn month_name(month: u32) -> Option<&'static str> {
    MONTH_NAMES.get(month.checked_sub(1)? as usize).copied()
}

/// Sorted distinct years and months among `(year, month)` pairs of one or more tables.
pub fn available_periods<I>(periods: I) -> (Vec<i32>, Vec<u32>)
where
    I: IntoIterator<Item = (Option<i32>, Option<u32>)>,
{
    let mut years = BTreeSet::new();
    let mut months = BTreeSet::new();
    for (year, month) in periods {
        years.extend(year);
        months.extend(month);
    }
    (years.into_iter().collect(), months.into_iter().collect())
}

/// Latest year and latest month present, if any.
pub fn default_period<I>(periods: I) -> Option<(i32, u32)>
where
    I: IntoIterator<Item = (Option<i32>, Option<u32>)>,
{
    let (years, months) = available_periods(periods);
    Some((*years.last()?, *months.last()?))
}

/// Distinct commodity names, sorted.
pub fn commodities(records: &[PriceRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.commodity.clone())
        .filter(|c| !c.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn selected<'a>(
    records: &'a [PriceRecord],
    year: i32,
    month: u32,
    commodities: &'a [String],
) -> impl Iterator<Item = &'a PriceRecord> + 'a {
    records.iter().filter(move |r| {
        r.in_period(year, month) && (commodities.is_empty() || commodities.contains(&r.commodity))
    })
}

/// Groups the selected period's rows by region. An empty `commodities` slice selects all.
pub fn summarize_regions(
    records: &[PriceRecord],
    year: i32,
    month: u32,
    commodities: &[String],
) -> MapSummary {
    let mut summary = MapSummary {
        year,
        month,
        ..MapSummary::default()
    };

    for record in selected(records, year, month, commodities) {
        let Some((lat, lon)) = record.coordinates() else {
            summary.skipped_without_coordinates += 1;
            continue;
        };

        let entry = CommodityEntry {
            commodity: record.commodity.clone(),
            price: record.price,
            unit: record.unit.clone(),
        };

        let existing = summary.regions.iter_mut().find(|r| {
            r.region_name == record.region_name
                && r.region_id == record.region_id
                && r.latitude == lat
                && r.longitude == lon
        });
        match existing {
            Some(region) => region.entries.push(entry),
            None => summary.regions.push(RegionSummary {
                region_name: record.region_name.clone(),
                region_id: record.region_id.clone(),
                latitude: lat,
                longitude: lon,
                entries: vec![entry],
            }),
        }
    }

    summary.regions.sort_by(|a, b| {
        a.region_name
            .cmp(&b.region_name)
            .then_with(|| a.region_id.cmp(&b.region_id))
    });

    if summary.is_empty() {
        tracing::warn!(
            "No data found for Year {}, Month {} and the selected commodities.",
            year,
            month
        );
    }
    summary
}

/// Groups the selected period's retail rows by market, sorted by market name then id.
pub fn summarize_markets(
    records: &[RetailPriceRecord],
    year: i32,
    month: u32,
    commodities: &[String],
) -> RetailSummary {
    let mut summary = RetailSummary {
        year,
        month,
        ..RetailSummary::default()
    };

    let rows = records.iter().filter(|r| {
        r.in_period(year, month) && (commodities.is_empty() || commodities.contains(&r.commodity))
    });
    for record in rows {
        let Some((lat, lon)) = record.coordinates() else {
            summary.skipped_without_coordinates += 1;
            continue;
        };

        let entry = CommodityEntry {
            commodity: record.commodity.clone(),
            price: record.price,
            unit: record.unit.clone(),
        };

        let existing = summary.markets.iter_mut().find(|m| {
            m.market == record.market && m.market_id == record.market_id && m.latitude == lat && m.longitude == lon
        });
        match existing {
            Some(market) => market.entries.push(entry),
            None => summary.markets.push(MarketSummary {
                market: record.market.clone(),
                market_id: record.market_id.clone(),
                latitude: lat,
                longitude: lon,
                entries: vec![entry],
            }),
        }
    }

    summary
        .markets
        .sort_by(|a, b| a.market.cmp(&b.market).then_with(|| a.market_id.cmp(&b.market_id)));
    summary
}

/// Row-level table for the selected period, sorted by region then commodity.
pub fn commodity_details(
    records: &[PriceRecord],
    year: i32,
    month: u32,
    commodities: &[String],
) -> Vec<DetailRow> {
    let mut rows: Vec<DetailRow> = selected(records, year, month, commodities)
        .map(|r| DetailRow {
            region: r.region_name.clone(),
            commodity: r.commodity.clone(),
            price: r
                .price
                .map(|p| format!("{:.2}", p))
                .unwrap_or_else(|| "N/A".to_string()),
            unit: r.unit.clone(),
        })
        .collect();
    rows.sort_by(|a, b| {
        a.region
            .cmp(&b.region)
            .then_with(|| a.commodity.cmp(&b.commodity))
    });
    rows
}
