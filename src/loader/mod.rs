use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::catalog::DATE_FORMAT;
use crate::countries::{KEY_FIELD, NAME_FIELD};
use crate::error::{DataError, DataResult};
use crate::store::{Dataset, RawTable};

pub const EPIDEM_FILE: &str = "country_level_epidem.csv";
/// The published file name carries this misspelling.
pub const HOSPITALIZATIONS_FILE: &str = "country_level_hopitalizations.csv";
pub const HOSPITALIZATIONS_FILE_ALT: &str = "country_level_hospitalizations.csv";
pub const VACCINATIONS_FILE: &str = "country_level_vaccinations.csv";
pub const COUNTRY_INDEX_FILE: &str = "small_index.csv";

pub const EPIDEM_ENDPOINT: &str = "/api/epidem";
pub const HOSPITALIZATIONS_ENDPOINT: &str = "/api/hospitalizations";
pub const VACCINATIONS_ENDPOINT: &str = "/api/vaccinations";
pub const COUNTRY_INDEX_ENDPOINT: &str = "/api/country-index";

/// Where the four input tables come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    /// A directory holding the four CSV files under their published names.
    Directory(PathBuf),
    /// Explicitly chosen files, e.g. from a manual upload.
    Files {
        epidemiology: PathBuf,
        hospitalizations: PathBuf,
        vaccinations: PathBuf,
        country_index: PathBuf,
    },
    /// A server exposing the four CSV endpoints below this base URL.
    Http(String),
    /// Built-in deterministic sample data.
    Sample,
}

impl DataSource {
    pub fn describe(&self) -> String {
        match self {
            DataSource::Directory(path) => format!("directory {}", path.display()),
            DataSource::Files { epidemiology, .. } => {
                format!("uploaded files ({} and others)", epidemiology.display())
            }
            DataSource::Http(base) => format!("server {}", base),
            DataSource::Sample => "sample data".to_string(),
        }
    }
}

/// The four raw tables a load consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTables {
    pub epidemiology: RawTable,
    pub hospitalizations: RawTable,
    pub vaccinations: RawTable,
    pub country_index: RawTable,
}

impl SourceTables {
    pub fn table(&self, dataset: Dataset) -> &RawTable {
        match dataset {
            Dataset::Epidemiology => &self.epidemiology,
            Dataset::Hospitalizations => &self.hospitalizations,
            Dataset::Vaccinations => &self.vaccinations,
        }
    }

    /// Fail if any of the four tables has no rows.
    pub fn ensure_non_empty(&self) -> DataResult<()> {
        let empty: Vec<&str> = Dataset::ALL
            .iter()
            .filter(|d| self.table(**d).is_empty())
            .map(|d| d.as_str())
            .chain(self.country_index.is_empty().then_some("country-index"))
            .collect();

        if empty.is_empty() {
            Ok(())
        } else {
            Err(DataError::EmptySource {
                source_name: empty.join(", "),
            })
        }
    }
}

/// Fetch all four tables from `source`.
pub async fn fetch(source: &DataSource) -> DataResult<SourceTables> {
    info!("Loading data from {}", source.describe());
    let tables = match source {
        DataSource::Directory(dir) => {
            let hospitalizations = hospitalizations_path(dir);
            read_files(
                &dir.join(EPIDEM_FILE),
                &hospitalizations,
                &dir.join(VACCINATIONS_FILE),
                &dir.join(COUNTRY_INDEX_FILE),
            )
            .await?
        }
        DataSource::Files {
            epidemiology,
            hospitalizations,
            vaccinations,
            country_index,
        } => read_files(epidemiology, hospitalizations, vaccinations, country_index).await?,
        DataSource::Http(base) => fetch_http(base).await?,
        DataSource::Sample => sample_tables(),
    };

    info!(
        "Loaded {} epidem, {} hospitalizations, {} vaccinations and {} country rows",
        tables.epidemiology.len(),
        tables.hospitalizations.len(),
        tables.vaccinations.len(),
        tables.country_index.len()
    );
    Ok(tables)
}

fn hospitalizations_path(dir: &Path) -> PathBuf {
    let published = dir.join(HOSPITALIZATIONS_FILE);
    if published.exists() {
        published
    } else {
        debug!("{} not found, trying {}", HOSPITALIZATIONS_FILE, HOSPITALIZATIONS_FILE_ALT);
        dir.join(HOSPITALIZATIONS_FILE_ALT)
    }
}

async fn read_files(
    epidemiology: &Path,
    hospitalizations: &Path,
    vaccinations: &Path,
    country_index: &Path,
) -> DataResult<SourceTables> {
    let (epidemiology, hospitalizations, vaccinations, country_index) = futures::try_join!(
        read_csv_file(epidemiology),
        read_csv_file(hospitalizations),
        read_csv_file(vaccinations),
        read_csv_file(country_index),
    )?;
    Ok(SourceTables {
        epidemiology,
        hospitalizations,
        vaccinations,
        country_index,
    })
}

async fn read_csv_file(path: &Path) -> DataResult<RawTable> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DataError::MissingFile {
            path: path.display().to_string(),
        },
        _ => DataError::Io(e),
    })?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    parse_csv(bytes)
}

async fn fetch_http(base: &str) -> DataResult<SourceTables> {
    let client = reqwest::Client::new();
    let base = base.trim_end_matches('/');
    let (epidemiology, hospitalizations, vaccinations, country_index) = futures::try_join!(
        fetch_csv(&client, base, EPIDEM_ENDPOINT),
        fetch_csv(&client, base, HOSPITALIZATIONS_ENDPOINT),
        fetch_csv(&client, base, VACCINATIONS_ENDPOINT),
        fetch_csv(&client, base, COUNTRY_INDEX_ENDPOINT),
    )?;
    Ok(SourceTables {
        epidemiology,
        hospitalizations,
        vaccinations,
        country_index,
    })
}

async fn fetch_csv(client: &reqwest::Client, base: &str, endpoint: &str) -> DataResult<RawTable> {
    let url = format!("{}{}", base, endpoint);
    let resp = client.get(&url).send().await?;

    if !resp.status().is_success() {
        return Err(DataError::Http(format!("{} returned {}", endpoint, resp.status())));
    }

    let bytes = resp.bytes().await?;
    debug!("Fetched {} bytes from {}", bytes.len(), url);
    parse_csv(bytes.to_vec())
}

/// Parse CSV text into a `RawTable`, reading every column as a string.
pub fn parse_csv(bytes: Vec<u8>) -> DataResult<RawTable> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(RawTable::default());
    }

    let df = CsvReader::new(Cursor::new(bytes))
        .has_header(true)
        .infer_schema(Some(0))
        .finish()?;

    let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let mut cells: Vec<Vec<Option<String>>> = Vec::with_capacity(columns.len());
    for series in df.get_columns() {
        let as_text = series.cast(&DataType::String)?;
        cells.push(
            as_text
                .str()?
                .into_iter()
                .map(|cell| cell.map(str::to_string))
                .collect(),
        );
    }

    let mut table = RawTable::new(columns);
    for row in 0..df.height() {
        table.push_row(
            cells
                .iter()
                .map(|column| column.get(row).and_then(|c| c.as_deref()).unwrap_or(""))
                .collect(),
        );
    }
    Ok(table)
}

/// Reference countries used by the sample data.
pub const SAMPLE_COUNTRIES: [(&str, &str); 30] = [
    ("us", "United States"),
    ("gb", "United Kingdom"),
    ("fr", "France"),
    ("de", "Germany"),
    ("it", "Italy"),
    ("es", "Spain"),
    ("jp", "Japan"),
    ("cn", "China"),
    ("in", "India"),
    ("br", "Brazil"),
    ("ca", "Canada"),
    ("au", "Australia"),
    ("ru", "Russia"),
    ("kr", "South Korea"),
    ("za", "South Africa"),
    ("mx", "Mexico"),
    ("se", "Sweden"),
    ("no", "Norway"),
    ("fi", "Finland"),
    ("dk", "Denmark"),
    ("pl", "Poland"),
    ("nl", "Netherlands"),
    ("be", "Belgium"),
    ("ch", "Switzerland"),
    ("at", "Austria"),
    ("pt", "Portugal"),
    ("gr", "Greece"),
    ("ie", "Ireland"),
    ("nz", "New Zealand"),
    ("sg", "Singapore"),
];

pub const SAMPLE_DAYS: i64 = 31;
const SAMPLE_END_DATE: (i32, u32, u32) = (2021, 6, 30);

/// (column, scale, period) triples; a value is `scale * (1 + sin(day / period))` times a per-country weight.
fn sample_columns(dataset: Dataset) -> &'static [(&'static str, f64, f64)] {
    match dataset {
        Dataset::Epidemiology => &[
            ("new_confirmed", 10_000.0, 3.0),
            ("new_deceased", 500.0, 3.0),
            ("cumulative_confirmed", 1_000_000.0, 30.0),
            ("cumulative_deceased", 50_000.0, 30.0),
        ],
        Dataset::Hospitalizations => &[
            ("new_hospitalized", 1_000.0, 3.0),
            ("current_hospitalized", 10_000.0, 5.0),
            ("current_intensive_care", 1_000.0, 4.0),
        ],
        Dataset::Vaccinations => &[
            ("new_persons_vaccinated", 100_000.0, 3.0),
            ("cumulative_persons_vaccinated", 1_000_000.0, 30.0),
            ("cumulative_persons_fully_vaccinated", 800_000.0, 30.0),
            ("cumulative_vaccine_doses_administered", 2_000_000.0, 30.0),
        ],
    }
}

fn sample_dates() -> Vec<String> {
    let (y, m, d) = SAMPLE_END_DATE;
    let Some(end) = NaiveDate::from_ymd_opt(y, m, d) else {
        warn!("Invalid sample end date");
        return Vec::new();
    };
    (0..SAMPLE_DAYS)
        .rev()
        .map(|back| (end - Duration::days(back)).format(DATE_FORMAT).to_string())
        .collect()
}

/// Deterministic stand-in for generated data: every sample country on each of
/// `SAMPLE_DAYS` consecutive days, with the published column names.
pub fn sample_dataset(dataset: Dataset) -> RawTable {
    let generators = sample_columns(dataset);
    let mut columns = vec!["country_key".to_string(), "date".to_string()];
    columns.extend(generators.iter().map(|(name, _, _)| name.to_string()));

    let dates = sample_dates();
    let mut table = RawTable::new(columns);
    for (country_idx, (key, _)) in SAMPLE_COUNTRIES.iter().enumerate() {
        let weight = 0.2 + ((country_idx * 37) % 17) as f64 / 17.0;
        for (day, date) in dates.iter().enumerate() {
            let values: Vec<String> = generators
                .iter()
                .map(|(_, scale, period)| {
                    let wave = 1.0 + (day as f64 / period).sin();
                    let phase = 0.5 + 0.5 * ((day + country_idx) as f64).cos().abs();
                    (scale * weight * wave * phase).floor().to_string()
                })
                .collect();
            let mut row = vec![*key, date.as_str()];
            row.extend(values.iter().map(String::as_str));
            table.push_row(row);
        }
    }
    table
}

pub fn sample_country_index() -> RawTable {
    let mut table = RawTable::new(vec![KEY_FIELD.to_string(), NAME_FIELD.to_string()]);
    for (key, name) in SAMPLE_COUNTRIES {
        table.push_row(vec![key, name]);
    }
    table
}

pub fn sample_tables() -> SourceTables {
    SourceTables {
        epidemiology: sample_dataset(Dataset::Epidemiology),
        hospitalizations: sample_dataset(Dataset::Hospitalizations),
        vaccinations: sample_dataset(Dataset::Vaccinations),
        country_index: sample_country_index(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const EPIDEM_CSV: &str = "date,location_key,new_confirmed,new_deceased\n\
                              2021-01-01,US,120,3\n\
                              2021-01-01,GB,,1\n";

    fn write_dir(hospital_name: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(EPIDEM_FILE), EPIDEM_CSV).unwrap();
        fs::write(
            dir.path().join(hospital_name),
            "date,country_code,new_hospitalized\n2021-01-01,us,10\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(VACCINATIONS_FILE),
            "date,country_key,new_persons_vaccinated\n2021-01-01,us,1000\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(COUNTRY_INDEX_FILE),
            "location_key,country_name\nus,United States\ngb,United Kingdom\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_parse_csv_reads_strings_and_blanks() {
        let table = parse_csv(EPIDEM_CSV.as_bytes().to_vec()).unwrap();
        assert_eq!(table.columns, vec!["date", "location_key", "new_confirmed", "new_deceased"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, 1), Some("US"));
        assert_eq!(table.cell(0, 2), Some("120"));
        assert_eq!(table.cell(1, 2), None);
        assert_eq!(table.cell(1, 3), Some("1"));
    }

    #[test]
    fn test_parse_empty_csv() {
        assert!(parse_csv(b"  \n".to_vec()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_source_with_published_names() {
        let dir = write_dir(HOSPITALIZATIONS_FILE);
        let tables = fetch(&DataSource::Directory(dir.path().to_path_buf())).await.unwrap();
        assert_eq!(tables.epidemiology.len(), 2);
        assert_eq!(tables.hospitalizations.len(), 1);
        assert_eq!(tables.country_index.len(), 2);
        assert!(tables.ensure_non_empty().is_ok());
    }

    #[tokio::test]
    async fn test_directory_source_alternate_hospitalizations_name() {
        let dir = write_dir(HOSPITALIZATIONS_FILE_ALT);
        let tables = fetch(&DataSource::Directory(dir.path().to_path_buf())).await.unwrap();
        assert_eq!(tables.hospitalizations.cell(0, 1), Some("us"));
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = fetch(&DataSource::Directory(dir.path().to_path_buf())).await.unwrap_err();
        assert!(matches!(err, DataError::MissingFile { .. }), "{:?}", err);
    }

    #[test]
    fn test_empty_table_names_source() {
        let mut tables = sample_tables();
        tables.vaccinations = RawTable::default();
        let err = tables.ensure_non_empty().unwrap_err();
        assert!(err.to_string().contains("vaccinations"), "{}", err);
    }

    #[test]
    fn test_sample_data_is_deterministic() {
        let first = sample_tables();
        assert_eq!(first, sample_tables());
        assert_eq!(first.epidemiology.len(), SAMPLE_COUNTRIES.len() * SAMPLE_DAYS as usize);
        assert_eq!(first.country_index.len(), 30);
        assert_eq!(first.epidemiology.cell(0, 1), Some("2021-05-31"));
        assert!(first.vaccinations.column_position("new_persons_vaccinated").is_some());
    }

    /// Serve `routes` as (path, body) over plain HTTP on a local port; other paths get 404.
    async fn serve_csv(routes: Vec<(&'static str, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => request.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&request).to_string();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let response = match routes.iter().find(|(route, _)| *route == path) {
                        Some((_, body)) => format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        ),
                        None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
                    };
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn endpoint_routes() -> Vec<(&'static str, String)> {
        vec![
            (EPIDEM_ENDPOINT, EPIDEM_CSV.to_string()),
            (
                HOSPITALIZATIONS_ENDPOINT,
                "date,country_code,new_hospitalized\n2021-01-01,us,10\n".to_string(),
            ),
            (
                VACCINATIONS_ENDPOINT,
                "date,country_key,new_persons_vaccinated\n2021-01-01,us,1000\n2021-01-02,gb,500\n".to_string(),
            ),
            (
                COUNTRY_INDEX_ENDPOINT,
                "location_key,country_name\nUS,United States\nGB,United Kingdom\n".to_string(),
            ),
        ]
    }

    #[tokio::test]
    async fn test_http_source_fetches_all_endpoints() {
        let base = serve_csv(endpoint_routes()).await;
        let tables = fetch(&DataSource::Http(format!("{}/", base))).await.unwrap();
        assert_eq!(tables.epidemiology.len(), 2);
        assert_eq!(tables.hospitalizations.len(), 1);
        assert_eq!(tables.vaccinations.len(), 2);
        assert_eq!(tables.country_index.cell(1, 1), Some("United Kingdom"));
        assert!(tables.ensure_non_empty().is_ok());
    }

    #[tokio::test]
    async fn test_http_error_status_names_endpoint() {
        let routes = endpoint_routes()
            .into_iter()
            .filter(|(route, _)| *route != VACCINATIONS_ENDPOINT)
            .collect();
        let base = serve_csv(routes).await;
        let err = fetch(&DataSource::Http(base)).await.unwrap_err();
        match err {
            DataError::Http(message) => {
                assert!(message.contains("/api/vaccinations"), "{}", message);
                assert!(message.contains("404"), "{}", message);
            }
            other => panic!("expected an HTTP error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_files_source() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = ["epi.csv", "hosp.csv", "vacc.csv", "index.csv"]
            .iter()
            .map(|name| dir.path().join(name))
            .collect();
        for (path, (_, body)) in paths.iter().zip(endpoint_routes()) {
            fs::write(path, body).unwrap();
        }

        let source = DataSource::Files {
            epidemiology: paths[0].clone(),
            hospitalizations: paths[1].clone(),
            vaccinations: paths[2].clone(),
            country_index: paths[3].clone(),
        };
        let tables = fetch(&source).await.unwrap();
        assert_eq!(tables.epidemiology.cell(0, 1), Some("US"));
        assert_eq!(tables.vaccinations.len(), 2);
        assert_eq!(tables.country_index.len(), 2);

        fs::remove_file(&paths[2]).unwrap();
        let err = fetch(&source).await.unwrap_err();
        assert!(matches!(err, DataError::MissingFile { ref path } if path.ends_with("vacc.csv")), "{:?}", err);
    }
}
