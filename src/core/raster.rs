//! Travel-time and friction surfaces: ASCII grid I/O, statistics and colour classification.

use crate::domain::model::{Bounds, Grid, LegendEntry, RasterLayer, RasterStats};
use crate::utils::error::{EtlError, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt::Write as _;

pub const PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];

/// Breakpoints with one colour per half-open interval `[breaks[i], breaks[i + 1])`.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    pub name: &'static str,
    pub unit: &'static str,
    pub breaks: Vec<f64>,
    pub colors: Vec<[u8; 3]>,
}

impl Palette {
    /// Minutes to the nearest city.
    pub fn travel_time() -> Self {
        Self {
            name: "Travel Time",
            unit: "min",
            breaks: vec![0.0, 10.0, 30.0, 60.0, 120.0, 240.0, 1440.0, f64::INFINITY],
            colors: vec![
                [255, 255, 204],
                [255, 237, 160],
                [254, 178, 76],
                [253, 141, 60],
                [240, 59, 32],
                [189, 0, 38],
                [128, 0, 38],
            ],
        }
    }

    /// Minutes per metre.
    pub fn friction() -> Self {
        Self {
            name: "Friction Surface",
            unit: "min/m",
            breaks: vec![0.0, 0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, f64::INFINITY],
            colors: vec![
                [0, 104, 55],
                [49, 163, 84],
                [120, 198, 121],
                [194, 230, 153],
                [253, 174, 97],
                [244, 109, 67],
                [165, 0, 38],
                [128, 0, 38],
            ],
        }
    }

    pub fn classify(&self, value: f64) -> Option<[u8; 3]> {
        self.breaks
            .windows(2)
            .position(|w| value >= w[0] && value < w[1])
            .and_then(|i| self.colors.get(i).copied())
    }

    pub fn legend(&self) -> Vec<LegendEntry> {
        self.breaks
            .windows(2)
            .zip(&self.colors)
            .map(|(w, color)| LegendEntry {
                label: if w[1].is_infinite() {
                    format!("> {}", w[0])
                } else {
                    format!("{}–{}", w[0], w[1])
                },
                color: format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2]),
            })
            .collect()
    }
}

fn header_dimension(key: &str, number: f64, line_no: usize) -> Result<usize> {
    if !number.is_finite() || number < 0.0 || number.fract() != 0.0 || number >= usize::MAX as f64 {
        return Err(EtlError::parse(
            "ascii grid",
            line_no,
            format!("{} must be a non-negative integer, got {}", key, number),
        ));
    }
    Ok(number as usize)
}

impl Grid {
    pub fn new(ncols: usize, nrows: usize, xll: f64, yll: f64, cell_size: f64, nodata: Option<f64>, values: Vec<f64>) -> Result<Self> {
        if ncols == 0 || nrows == 0 {
            return Err(EtlError::validation("grid must have at least one row and column"));
        }
        let cells = ncols
            .checked_mul(nrows)
            .ok_or_else(|| EtlError::validation(format!("grid of {} x {} cells is too large", ncols, nrows)))?;
        if values.len() != cells {
            return Err(EtlError::validation(format!(
                "grid expects {} values, got {}",
                cells,
                values.len()
            )));
        }
        if cell_size.is_nan() || cell_size <= 0.0 {
            return Err(EtlError::validation("cell size must be positive"));
        }
        Ok(Self {
            ncols,
            nrows,
            xll,
            yll,
            cell_size,
            nodata,
            values,
        })
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            left: self.xll,
            bottom: self.yll,
            right: self.xll + self.ncols as f64 * self.cell_size,
            top: self.yll + self.nrows as f64 * self.cell_size,
        }
    }

    /// A NODATA value of 0 is treated as unset, so zero travel times stay valid.
    pub fn is_valid(&self, value: f64) -> bool {
        match self.nodata {
            Some(nodata) if nodata != 0.0 => value != nodata && !value.is_nan(),
            _ => value.is_finite(),
        }
    }

    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied().filter(|v| self.is_valid(*v))
    }

    /// Parses an ESRI ASCII grid (`.asc`).
    pub fn from_ascii(text: &str) -> Result<Self> {
        let mut ncols = None;
        let mut nrows = None;
        let mut xll = None;
        let mut yll = None;
        let mut centered = (false, false);
        let mut cell_size = None;
        let mut nodata = None;
        let mut values = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let mut tokens = line.split_whitespace().peekable();
            let Some(first) = tokens.peek().copied() else {
                continue;
            };

            if first.starts_with(|c: char| c.is_ascii_alphabetic()) && values.is_empty() {
                let key = first.to_ascii_lowercase();
                tokens.next();
                let raw = tokens
                    .next()
                    .ok_or_else(|| EtlError::parse("ascii grid", line_no, format!("{} has no value", key)))?;
                let number = raw
                    .parse::<f64>()
                    .map_err(|_| EtlError::parse("ascii grid", line_no, format!("invalid {} '{}'", key, raw)))?;

                match key.as_str() {
                    "ncols" => ncols = Some(header_dimension(&key, number, line_no)?),
                    "nrows" => nrows = Some(header_dimension(&key, number, line_no)?),
                    "xllcorner" => xll = Some(number),
                    "xllcenter" => {
                        xll = Some(number);
                        centered.0 = true;
                    }
                    "yllcorner" => yll = Some(number),
                    "yllcenter" => {
                        yll = Some(number);
                        centered.1 = true;
                    }
                    "cellsize" => cell_size = Some(number),
                    "nodata_value" => nodata = Some(number),
                    other => {
                        return Err(EtlError::parse("ascii grid", line_no, format!("unknown header '{}'", other)))
                    }
                }
                continue;
            }

            for token in tokens {
                let value = token
                    .parse::<f64>()
                    .map_err(|_| EtlError::parse("ascii grid", line_no, format!("invalid cell value '{}'", token)))?;
                values.push(value);
            }
        }

        let missing = |name: &str| EtlError::parse("ascii grid", 1, format!("missing {} header", name));
        let cell_size = cell_size.ok_or_else(|| missing("cellsize"))?;
        let mut xll = xll.ok_or_else(|| missing("xllcorner"))?;
        let mut yll = yll.ok_or_else(|| missing("yllcorner"))?;
        // center 形式要換算成左下角
        if centered.0 {
            xll -= cell_size / 2.0;
        }
        if centered.1 {
            yll -= cell_size / 2.0;
        }

        let ncols = ncols.ok_or_else(|| missing("ncols"))?;
        let nrows = nrows.ok_or_else(|| missing("nrows"))?;
        if ncols.checked_mul(nrows).is_none() {
            return Err(EtlError::parse(
                "ascii grid",
                1,
                format!("grid of {} x {} cells is too large", ncols, nrows),
            ));
        }

        Self::new(
            ncols,
            nrows,
            xll,
            yll,
            cell_size,
            nodata,
            values,
        )
    }

    pub fn to_ascii(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "ncols {}", self.ncols);
        let _ = writeln!(out, "nrows {}", self.nrows);
        let _ = writeln!(out, "xllcorner {}", self.xll);
        let _ = writeln!(out, "yllcorner {}", self.yll);
        let _ = writeln!(out, "cellsize {}", self.cell_size);
        if let Some(nodata) = self.nodata {
            let _ = writeln!(out, "NODATA_value {}", nodata);
        }
        for row in self.values.chunks(self.ncols) {
            let line = row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    /// Classifies every cell and encodes the result as a binary PPM (P6). Masked cells are black.
    pub fn render_ppm(&self, palette: &Palette) -> Vec<u8> {
        let mut image = format!("P6\n{} {}\n255\n", self.ncols, self.nrows).into_bytes();
        image.reserve(self.values.len() * 3);
        for &value in &self.values {
            let rgb = if self.is_valid(value) {
                palette.classify(value).unwrap_or([0, 0, 0])
            } else {
                [0, 0, 0]
            };
            image.extend_from_slice(&rgb);
        }
        image
    }

    pub fn to_layer(&self, palette: &Palette) -> Result<RasterLayer> {
        Ok(RasterLayer {
            name: palette.name.to_string(),
            bounds: self.bounds(),
            stats: compute_stats(self)?,
            legend: palette.legend(),
            image: self.render_ppm(palette),
        })
    }
}

/// Linear interpolation between closest ranks over sorted values.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn compute_stats(grid: &Grid) -> Result<RasterStats> {
    let mut values: Vec<f64> = grid.valid_values().collect();
    if values.is_empty() {
        return Err(EtlError::validation("raster has no valid cells"));
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Ok(RasterStats {
        valid_cells: values.len(),
        min: values[0],
        max: values[values.len() - 1],
        mean,
        std_dev: variance.sqrt(),
        percentiles: PERCENTILES
            .iter()
            .filter_map(|&q| percentile(&values, q).map(|v| (q, v)))
            .collect(),
    })
}

/// Uniform `[0, 100)` cost surface of 100x100 cells, north-west corner at (0, 10), 0.1 degree cells.
pub fn synthetic_cost_surface(seed: u64) -> Grid {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (ncols, nrows, cell_size) = (100, 100, 0.1);
    let values = (0..ncols * nrows)
        .map(|_| rng.gen_range(0.0..100.0))
        .collect();

    Grid {
        ncols,
        nrows,
        xll: 0.0,
        yll: 10.0 - nrows as f64 * cell_size,
        cell_size,
        nodata: None,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASC: &str = "ncols 3\nnrows 2\nxllcorner -17.5\nyllcorner 12.0\ncellsize 0.5\nNODATA_value -9999\n5 25 -9999\n100 2000 45\n";

    #[test]
    fn test_parse_ascii_grid() {
        let grid = Grid::from_ascii(ASC).unwrap();
        assert_eq!((grid.ncols, grid.nrows), (3, 2));
        assert_eq!(grid.nodata, Some(-9999.0));
        assert_eq!(
            grid.bounds(),
            Bounds {
                left: -17.5,
                bottom: 12.0,
                right: -16.0,
                top: 13.0
            }
        );
        assert_eq!(grid.valid_values().count(), 5);

        let again = Grid::from_ascii(&grid.to_ascii()).unwrap();
        assert_eq!(again, grid);
    }

    #[test]
    fn test_center_registration_is_shifted() {
        let asc = "ncols 1\nnrows 1\nxllcenter 0.5\nyllcenter 0.5\ncellsize 1\n7\n";
        let grid = Grid::from_ascii(asc).unwrap();
        assert_eq!(grid.xll, 0.0);
        assert_eq!(grid.yll, 0.0);
        assert_eq!(grid.nodata, None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Grid::from_ascii("ncols 2\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 1\n1\n").is_err());
        assert!(Grid::from_ascii("ncols 1\nnrows 1\nxllcorner 0\ncellsize 1\n1\n").is_err());
        let err = Grid::from_ascii("ncols 1\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 1\nx\n").unwrap_err();
        assert!(matches!(err, EtlError::ParseError { line: 6, .. }));
    }

    #[test]
    fn test_dimension_headers_must_be_whole_numbers() {
        let huge = Grid::from_ascii("ncols 1e20\nnrows 1e20\nxllcorner 0\nyllcorner 0\ncellsize 1\n1\n").unwrap_err();
        assert!(matches!(huge, EtlError::ParseError { line: 1, .. }), "{:?}", huge);

        let overflow = format!(
            "ncols {}\nnrows {}\nxllcorner 0\nyllcorner 0\ncellsize 1\n1\n",
            1u64 << 40,
            1u64 << 40
        );
        assert!(matches!(Grid::from_ascii(&overflow), Err(EtlError::ParseError { .. })));

        let fractional = Grid::from_ascii("ncols 2.7\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2\n").unwrap_err();
        assert!(matches!(fractional, EtlError::ParseError { line: 1, .. }));
        assert!(Grid::from_ascii("ncols -1\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 1\n1\n").is_err());
        assert!(Grid::new(usize::MAX, 2, 0.0, 0.0, 1.0, None, vec![]).is_err());
    }

    #[test]
    fn test_zero_nodata_keeps_zero_cells() {
        let grid = Grid::from_ascii("ncols 3\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 1\nNODATA_value 0\n0 15 NaN\n").unwrap();
        assert_eq!(grid.valid_values().collect::<Vec<_>>(), vec![0.0, 15.0]);

        let masked = Grid::from_ascii("ncols 2\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 1\nNODATA_value -9999\n0 -9999\n").unwrap();
        assert_eq!(masked.valid_values().collect::<Vec<_>>(), vec![0.0]);
    }

    #[test]
    fn test_stats_match_numpy() {
        let grid = Grid::from_ascii(ASC).unwrap();
        let stats = compute_stats(&grid).unwrap();

        assert_eq!(stats.valid_cells, 5);
        assert_eq!(stats.min, 5.0);
        assert_eq!(stats.max, 2000.0);
        assert!((stats.mean - 435.0).abs() < 1e-9);
        // population std of [5, 25, 45, 100, 2000]
        assert!((stats.std_dev - 783.141).abs() < 1e-3);
        assert_eq!(stats.percentiles[2], (50.0, 45.0));
        assert_eq!(stats.percentiles[1], (25.0, 25.0));
        // 95th: rank 3.8 between 100 and 2000
        assert!((stats.percentiles[4].1 - 1620.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_nodata_is_an_error() {
        let grid = Grid::new(2, 1, 0.0, 0.0, 1.0, Some(-1.0), vec![-1.0, -1.0]).unwrap();
        assert!(compute_stats(&grid).is_err());
    }

    #[test]
    fn test_classification_half_open() {
        let travel = Palette::travel_time();
        assert_eq!(travel.classify(0.0), Some([255, 255, 204]));
        assert_eq!(travel.classify(10.0), Some([255, 237, 160]));
        assert_eq!(travel.classify(5000.0), Some([128, 0, 38]));
        assert_eq!(travel.classify(-1.0), None);

        let friction = Palette::friction();
        assert_eq!(friction.classify(0.0005), Some([0, 104, 55]));
        assert_eq!(friction.classify(7.0), Some([128, 0, 38]));
    }

    #[test]
    fn test_legend_labels_and_colors() {
        let legend = Palette::travel_time().legend();
        assert_eq!(legend.len(), 7);
        assert_eq!(legend[0].label, "0–10");
        assert_eq!(legend[0].color, "#ffffcc");
        assert_eq!(legend[6].label, "> 1440");
        assert_eq!(legend[6].color, "#800026");
        assert_eq!(Palette::friction().legend().len(), 8);
    }

    #[test]
    fn test_render_ppm_masks_nodata() {
        let grid = Grid::from_ascii(ASC).unwrap();
        let image = grid.render_ppm(&Palette::travel_time());
        let header = b"P6\n3 2\n255\n";
        assert_eq!(&image[..header.len()], header);
        assert_eq!(image.len(), header.len() + 18);
        // 第三格是 nodata
        assert_eq!(&image[header.len() + 6..header.len() + 9], &[0, 0, 0]);
        assert_eq!(&image[header.len()..header.len() + 3], &[255, 255, 204]);
    }

    #[test]
    fn test_synthetic_surface_is_seeded() {
        let a = synthetic_cost_surface(42);
        let b = synthetic_cost_surface(42);
        assert_eq!(a, b);
        assert_eq!(a.values.len(), 10_000);
        assert!(a.values.iter().all(|v| (0.0..100.0).contains(v)));
        let bounds = a.bounds();
        assert!((bounds.top - 10.0).abs() < 1e-9);
        assert!(bounds.bottom.abs() < 1e-9);
    }
}
