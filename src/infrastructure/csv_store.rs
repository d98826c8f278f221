//! CSV Store
//!
//! Reads and writes the plain-text OHLCV files the bot has accumulated over
//! time. Three layouts are understood:
//! - the current format: two `#` comment lines, then space separated
//!   `YYYY-MM-DD HH:MM open high low close volume` rows
//! - bare tables (tab or space separated) with 5, 6 or 7 columns
//! - tables with a named header row (`timestamp open high low close volume`,
//!   MT4 style `<DATE> <TIME> <OPEN> ...`)
//!
//! Loading never fails: unreadable or missing files produce an empty series,
//! which callers treat as "unavailable".

use crate::domain::errors::MarketDataError;
use crate::domain::market::{Bar, MarketType, OhlcvSeries, Timeframe};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";
const PRICE_DECIMALS: u32 = 5;
const COLUMNS_COMMENT: &str = "# timestamp open high low close volume";

pub struct CsvStore {
    data_dir: PathBuf,
    charts_dir: PathBuf,
}

impl CsvStore {
    pub fn new(data_dir: impl Into<PathBuf>, charts_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            charts_dir: charts_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn charts_dir(&self) -> &Path {
        &self.charts_dir
    }

    /// `data/{SYMBOL}_{TIMEFRAME}.csv`
    pub fn path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}.csv", file_symbol(symbol), timeframe))
    }

    pub fn live_path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}_live.csv", file_symbol(symbol), timeframe))
    }

    /// Writes the series in the current format, replacing any existing file.
    pub fn save(
        &self,
        series: &OhlcvSeries,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<PathBuf, MarketDataError> {
        if series.is_empty() {
            warn!("CsvStore: No data to save for {} {}", symbol, timeframe);
            return Err(MarketDataError::not_available("csv", symbol, timeframe));
        }

        let path = self.path_for(symbol, timeframe);
        ensure_dir(&self.data_dir)?;

        let text = render_historical(series, symbol, timeframe);
        fs::write(&path, text).map_err(|e| io_error(&path, e))?;

        info!("CsvStore: Historical data saved to {}", path.display());
        Ok(path)
    }

    /// Appends live bars to `{SYMBOL}_{TIMEFRAME}_live.csv`, creating it with
    /// a header when missing.
    pub fn append_live(
        &self,
        bars: &[Bar],
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<PathBuf, MarketDataError> {
        let path = self.live_path_for(symbol, timeframe);
        if bars.is_empty() {
            return Ok(path);
        }
        ensure_dir(&self.data_dir)?;

        let mut text = String::new();
        if !path.exists() {
            text.push_str(&format!("# Live data for {} {}\n", symbol, timeframe));
            text.push_str(COLUMNS_COMMENT);
            text.push('\n');
        }
        for bar in bars {
            text.push_str(&format_row(bar));
            text.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| io_error(&path, e))?;

        debug!(
            "CsvStore: Appended {} live bars to {}",
            bars.len(),
            path.display()
        );
        Ok(path)
    }

    /// Loads the first candidate file that parses.
    pub fn load(&self, symbol: &str, timeframe: Timeframe) -> OhlcvSeries {
        for path in self.candidate_paths(symbol, timeframe) {
            if !path.exists() {
                continue;
            }
            match read_ohlcv_file(&path) {
                Ok(series) if !series.is_empty() => {
                    info!("CsvStore: Loaded {} rows from {}", series.len(), path.display());
                    return series;
                }
                Ok(_) => warn!("CsvStore: {} contains no rows", path.display()),
                Err(e) => warn!("CsvStore: Error with format of {}: {}", path.display(), e),
            }
        }

        warn!("CsvStore: No data file found for {} {}", symbol, timeframe);
        OhlcvSeries::empty()
    }

    /// Loads a chart export: `charts/{market}/{SYMBOL}{minutes}.csv`, or the
    /// same name under `data/{market}/`.
    pub fn load_chart(
        &self,
        market: MarketType,
        symbol: &str,
        timeframe: Timeframe,
    ) -> OhlcvSeries {
        let file_name = format!("{}{}.csv", file_symbol(symbol), timeframe.to_minutes_suffix());
        let candidates = [
            self.charts_dir.join(market.as_str()).join(&file_name),
            self.data_dir.join(market.as_str()).join(&file_name),
        ];

        for path in candidates.iter().filter(|p| p.exists()) {
            match read_ohlcv_file(path) {
                Ok(series) if !series.is_empty() => {
                    debug!("CsvStore: Loaded {} chart rows from {}", series.len(), path.display());
                    return series;
                }
                Ok(_) => warn!("CsvStore: {} contains no rows", path.display()),
                Err(e) => warn!("CsvStore: Error reading chart data {}: {}", path.display(), e),
            }
        }

        debug!("CsvStore: Chart file not found: {}", file_name);
        OhlcvSeries::empty()
    }

    /// Symbols with chart files under `charts/{market}`, digits stripped.
    pub fn list_chart_symbols(&self, market: MarketType) -> Vec<String> {
        csv_stems(&self.charts_dir.join(market.as_str()))
            .into_iter()
            .map(|stem| stem.chars().filter(|c| !c.is_ascii_digit()).collect::<String>())
            .filter(|s| !s.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// File stems of every CSV directly under the data directory.
    pub fn list_data_files(&self) -> Vec<String> {
        csv_stems(&self.data_dir)
    }

    fn candidate_paths(&self, symbol: &str, timeframe: Timeframe) -> Vec<PathBuf> {
        let slashless = symbol.replace('/', "");
        let unsuffixed = slashless.split('.').next().unwrap_or(&slashless).to_string();
        let minutes = timeframe.to_minutes_suffix();
        let market_dir = self.charts_dir.join(MarketType::infer(&slashless).as_str());

        let mut candidates = vec![
            self.data_dir.join(format!("{}_{}.csv", symbol, timeframe)),
            self.data_dir.join(format!("{}_{}.csv", slashless, timeframe)),
            self.data_dir.join(format!("{}_{}.csv", unsuffixed, timeframe)),
            self.data_dir.join(format!("{}{}.csv", slashless, minutes)),
            market_dir.join(format!("{}{}.csv", slashless, minutes)),
            market_dir.join(format!("{}_{}.csv", slashless, timeframe)),
        ];

        let mut seen = BTreeSet::new();
        candidates.retain(|p| seen.insert(p.clone()));
        candidates
    }
}

fn file_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

fn ensure_dir(dir: &Path) -> Result<(), MarketDataError> {
    fs::create_dir_all(dir).map_err(|e| io_error(dir, e))
}

fn io_error(path: &Path, source: std::io::Error) -> MarketDataError {
    MarketDataError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn csv_stems(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut stems: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    stems.sort();
    stems
}

/// `{:.5}` on a Decimal truncates, so prices are rounded half-to-even first.
fn price_5dp(price: Decimal) -> Decimal {
    price.round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::MidpointNearestEven)
}

fn format_row(bar: &Bar) -> String {
    format!(
        "{} {:.5} {:.5} {:.5} {:.5} {}",
        bar.timestamp.format(TIMESTAMP_FORMAT),
        price_5dp(bar.open),
        price_5dp(bar.high),
        price_5dp(bar.low),
        price_5dp(bar.close),
        bar.volume.trunc()
    )
}

/// The exact on-disk text of a historical file. Rows are joined by `\n`
/// with no trailing newline, matching files already on disk.
pub fn render_historical(series: &OhlcvSeries, symbol: &str, timeframe: Timeframe) -> String {
    let rows: Vec<String> = series.iter().map(format_row).collect();
    format!(
        "# Historical data for {} {}\n{}\n{}",
        symbol,
        timeframe,
        COLUMNS_COMMENT,
        rows.join("\n")
    )
}

/// Column positions resolved from a header row or the column count.
#[derive(Debug, Clone, Copy)]
struct Layout {
    date: usize,
    time: Option<usize>,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl Layout {
    const DATE_TIME_SPLIT: Layout = Layout {
        date: 0,
        time: Some(1),
        open: 2,
        high: 3,
        low: 4,
        close: 5,
        volume: Some(6),
    };

    fn from_column_count(count: usize) -> Option<Layout> {
        match count {
            5 => Some(Layout {
                date: 0,
                time: None,
                open: 1,
                high: 2,
                low: 3,
                close: 4,
                volume: None,
            }),
            6 => Some(Layout {
                date: 0,
                time: None,
                open: 1,
                high: 2,
                low: 3,
                close: 4,
                volume: Some(5),
            }),
            7 => Some(Self::DATE_TIME_SPLIT),
            _ => None,
        }
    }

    fn from_header(fields: &[String]) -> Option<Layout> {
        let names: Vec<String> = fields
            .iter()
            .map(|f| f.trim_matches(|c| c == '<' || c == '>').to_lowercase())
            .collect();
        let find = |wanted: &[&str]| names.iter().position(|n| wanted.contains(&n.as_str()));

        let open = find(&["open", "o"])?;
        let high = find(&["high", "h"])?;
        let low = find(&["low", "l"])?;
        let close = find(&["close", "c"])?;
        let volume = find(&["volume", "vol", "tickvol", "v"]);

        let (date, time) = match find(&["timestamp", "datetime"]) {
            Some(idx) => (idx, None),
            None => {
                let date = find(&["date", "time"])?;
                let time = names
                    .iter()
                    .enumerate()
                    .position(|(i, n)| i != date && n == "time");
                (date, time)
            }
        };

        Some(Layout {
            date,
            time,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

fn looks_like_header(fields: &[String]) -> bool {
    fields.iter().any(|f| {
        let lower = f.to_lowercase();
        lower.contains("open") || lower.contains("close")
    })
}

/// Reads one OHLCV file, detecting which historical layout it uses.
pub fn read_ohlcv_file(path: &Path) -> Result<OhlcvSeries, MarketDataError> {
    let content = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    parse_ohlcv(&content).map_err(|reason| MarketDataError::InvalidData {
        symbol: path.display().to_string(),
        reason,
    })
}

/// Parses OHLCV text in any of the supported layouts.
pub fn parse_ohlcv(content: &str) -> Result<OhlcvSeries, String> {
    let first_line = content.lines().next().unwrap_or_default().trim();
    let has_comment_header =
        first_line.contains("Historical data") || first_line.contains("Live data");

    let delimiter = if !has_comment_header && first_line.contains('\t') {
        b'\t'
    } else {
        b' '
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        // Runs of spaces show up as empty fields
        let fields: Vec<String> = record
            .iter()
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if !fields.is_empty() {
            rows.push(fields);
        }
    }

    let Some(first) = rows.first() else {
        return Ok(OhlcvSeries::empty());
    };

    let (layout, data_rows) = if has_comment_header {
        if first.len() < 7 {
            return Err(format!("expected 7 columns, found {}", first.len()));
        }
        (Layout::DATE_TIME_SPLIT, &rows[..])
    } else if looks_like_header(first) {
        let layout = Layout::from_header(first)
            .ok_or_else(|| "header is missing required open/high/low/close columns".to_string())?;
        (layout, &rows[1..])
    } else {
        let layout = Layout::from_column_count(first.len())
            .ok_or_else(|| format!("unexpected number of columns: {}", first.len()))?;
        (layout, &rows[..])
    };

    let bars = data_rows
        .iter()
        .enumerate()
        .map(|(i, fields)| parse_row(fields, &layout).map_err(|e| format!("row {}: {}", i + 1, e)))
        .collect::<Result<Vec<Bar>, String>>()?;

    Ok(OhlcvSeries::new(bars))
}

fn parse_row(fields: &[String], layout: &Layout) -> Result<Bar, String> {
    let field = |idx: usize| {
        fields
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| format!("missing column {}", idx + 1))
    };

    let timestamp_text = match layout.time {
        Some(time_idx) => format!("{} {}", field(layout.date)?, field(time_idx)?),
        None => field(layout.date)?.to_string(),
    };
    let timestamp = parse_timestamp(&timestamp_text)
        .ok_or_else(|| format!("unparseable timestamp '{}'", timestamp_text))?;

    let volume = match layout.volume {
        Some(idx) => match fields.get(idx) {
            Some(v) => parse_decimal(v)?,
            None => Decimal::ZERO,
        },
        None => Decimal::ZERO,
    };

    Ok(Bar::new(
        timestamp,
        parse_decimal(field(layout.open)?)?,
        parse_decimal(field(layout.high)?)?,
        parse_decimal(field(layout.low)?)?,
        parse_decimal(field(layout.close)?)?,
        volume,
    ))
}

fn parse_decimal(text: &str) -> Result<Decimal, String> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| format!("invalid number '{}'", text))
}

/// Accepts the timestamp spellings found in existing files.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y.%m.%d %H:%M:%S",
        "%Y.%m.%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d", "%Y%m%d"];

    let text = text.trim();

    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.naive_utc());
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    // Epoch seconds or milliseconds
    if let Ok(epoch) = text.parse::<i64>() {
        let dt = if epoch.abs() >= 100_000_000_000 {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
        return dt.map(|d| d.naive_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn ts(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn sample_series() -> OhlcvSeries {
        OhlcvSeries::new(vec![
            Bar::new(ts(1, 0, 0), dec!(1.10001), dec!(1.10250), dec!(1.09950), dec!(1.10100), dec!(1200)),
            Bar::new(ts(1, 1, 0), dec!(1.10100), dec!(1.10300), dec!(1.10000), dec!(1.10275), dec!(987)),
            Bar::new(ts(1, 2, 0), dec!(1.10275), dec!(1.10280), dec!(1.09800), dec!(1.09912), dec!(15)),
        ])
    }

    #[test]
    fn test_render_matches_on_disk_format() {
        let text = render_historical(&sample_series(), "EURUSD", Timeframe::OneHour);
        let expected = "# Historical data for EURUSD H1\n\
                        # timestamp open high low close volume\n\
                        2024-03-01 00:00 1.10001 1.10250 1.09950 1.10100 1200\n\
                        2024-03-01 01:00 1.10100 1.10300 1.10000 1.10275 987\n\
                        2024-03-01 02:00 1.10275 1.10280 1.09800 1.09912 15";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_prices_beyond_five_decimals_are_rounded() {
        let series = OhlcvSeries::new(vec![Bar::new(
            ts(1, 0, 0),
            dec!(1.234567),
            dec!(61000.123459),
            dec!(0.000009),
            dec!(2.999996),
            dec!(1200.50),
        )]);

        let text = render_historical(&series, "BTCUSD", Timeframe::OneHour);
        assert!(text.ends_with("2024-03-01 00:00 1.23457 61000.12346 0.00001 3.00000 1200"));

        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("data"), dir.path().join("charts"));
        store.save(&series, "BTCUSD", Timeframe::OneHour).unwrap();
        let bar = store.load("BTCUSD", Timeframe::OneHour).first().cloned().unwrap();
        assert_eq!(bar.open, dec!(1.23457));
        assert_eq!(bar.high, dec!(61000.12346));
        assert_eq!(bar.low, dec!(0.00001));
        assert_eq!(bar.close, dec!(3));
        assert_eq!(bar.volume, dec!(1200));
    }

    #[test]
    fn test_half_way_prices_round_to_even() {
        assert_eq!(price_5dp(dec!(1.000005)), dec!(1.00000));
        assert_eq!(price_5dp(dec!(1.000015)), dec!(1.00002));
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("data"), dir.path().join("charts"));
        let series = sample_series();

        let path = store.save(&series, "EURUSD", Timeframe::OneHour).unwrap();
        assert!(path.ends_with("EURUSD_H1.csv"));

        let loaded = store.load("EURUSD", Timeframe::OneHour);
        assert_eq!(loaded, series);
    }

    #[test]
    fn test_volume_fraction_is_truncated() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path(), dir.path().join("charts"));
        let series = OhlcvSeries::new(vec![Bar::new(
            ts(2, 10, 0),
            dec!(2),
            dec!(3),
            dec!(1),
            dec!(2.5),
            dec!(1500.9),
        )]);

        store.save(&series, "XAUUSD", Timeframe::FourHour).unwrap();
        let loaded = store.load("XAUUSD", Timeframe::FourHour);
        assert_eq!(loaded.bars()[0].volume, dec!(1500));
        assert_eq!(loaded.bars()[0].close, dec!(2.5));
    }

    #[test]
    fn test_missing_file_is_empty_not_error() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path(), dir.path().join("charts"));
        assert!(store.load("NOPE", Timeframe::OneHour).is_empty());
    }

    #[test]
    fn test_parse_bare_tab_six_columns() {
        let content = "2024-03-01 00:00\t100.5\t101\t99.5\t100.75\t12.5\n\
                       2024-03-01 00:01\t100.75\t102\t100\t101.25\t3\n";
        let series = parse_ohlcv(content).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[1].close, dec!(101.25));
        assert_eq!(series.bars()[0].volume, dec!(12.5));
    }

    #[test]
    fn test_parse_bare_space_seven_columns() {
        let content = "2024.03.01 00:00 1.2 1.3 1.1 1.25 40\n2024.03.01 00:05 1.25 1.3 1.2 1.22 41";
        let series = parse_ohlcv(content).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.first().unwrap().timestamp, ts(1, 0, 0));
    }

    #[test]
    fn test_parse_named_header_without_volume() {
        let content = "timestamp\topen\thigh\tlow\tclose\n2024-03-01 00:00:00\t1\t2\t0.5\t1.5\n";
        let series = parse_ohlcv(content).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.bars()[0].volume, Decimal::ZERO);
    }

    #[test]
    fn test_parse_mt4_header() {
        let content = "<DATE> <TIME> <OPEN> <HIGH> <LOW> <CLOSE> <TICKVOL>\n\
                       2024.03.01 00:00:00 1.1 1.2 1.0 1.15 77\n";
        let series = parse_ohlcv(content).unwrap();
        assert_eq!(series.bars()[0].volume, dec!(77));
    }

    #[test]
    fn test_parse_rejects_unknown_layout() {
        assert!(parse_ohlcv("a b c\n").is_err());
        assert!(parse_ohlcv("2024-03-01 00:00 x 1 1 1 1\n").is_err());
    }

    #[test]
    fn test_load_falls_through_bad_candidate() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("GBPUSD_M15.csv"), "garbage line\n").unwrap();
        fs::write(
            data.join("GBPUSD15.csv"),
            "2024-03-01 00:00 1.25 1.26 1.24 1.255 10\n",
        )
        .unwrap();

        let store = CsvStore::new(&data, dir.path().join("charts"));
        let series = store.load("GBPUSD", Timeframe::FifteenMin);
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_live_append_creates_header_once() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path(), dir.path().join("charts"));
        let bars = sample_series().into_bars();

        store.append_live(&bars[..1], "EURUSD", Timeframe::OneMin).unwrap();
        let path = store.append_live(&bars[1..], "EURUSD", Timeframe::OneMin).unwrap();

        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("# Live data for EURUSD M1\n"));
        assert_eq!(text.matches("# Live data").count(), 1);
        assert_eq!(parse_ohlcv(&text).unwrap().len(), 3);
    }

    #[test]
    fn test_chart_symbols_strip_digits() {
        let dir = tempdir().unwrap();
        let crypto = dir.path().join("charts").join("crypto");
        fs::create_dir_all(&crypto).unwrap();
        fs::write(crypto.join("BTCUSDT60.csv"), "").unwrap();
        fs::write(crypto.join("BTCUSDT240.csv"), "").unwrap();
        fs::write(crypto.join("ETHUSDT15.csv"), "").unwrap();

        let store = CsvStore::new(dir.path().join("data"), dir.path().join("charts"));
        assert_eq!(
            store.list_chart_symbols(MarketType::Crypto),
            vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
        );
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert_eq!(parse_timestamp("2024-03-01 05:30"), Some(ts(1, 5, 30)));
        assert_eq!(parse_timestamp("2024-03-01T05:30:00Z"), Some(ts(1, 5, 30)));
        assert_eq!(parse_timestamp("2024-03-01"), Some(ts(1, 0, 0)));
        assert_eq!(parse_timestamp("1709251200"), Some(ts(1, 0, 0)));
        assert_eq!(parse_timestamp("1709251200000"), Some(ts(1, 0, 0)));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
